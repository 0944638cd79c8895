//! Bridge wire protocol
//!
//! Client frame: `[opcode (1)][payload...]`, payload layout fixed per opcode.
//! Server frame: `[status (4)][payload...]`.
//!
//! Every multi-byte integer is a signed 32-bit big-endian value. A
//! non-negative status is the command's result (bytes transferred, line
//! level, ...); negative values are the codes in [`status`].

use std::io::{self, Read, Write};

use super::ControlLine;

pub mod opcode {
    pub const NOOP: u8 = 0;
    pub const CLOSE: u8 = 1;
    pub const READ: u8 = 2;
    pub const WRITE: u8 = 3;
    pub const SET_PARAMETERS: u8 = 4;
    pub const GET_CD: u8 = 5;
    pub const GET_CTS: u8 = 6;
    pub const GET_DSR: u8 = 7;
    pub const GET_DTR: u8 = 8;
    pub const GET_RI: u8 = 9;
    pub const GET_RTS: u8 = 10;
    pub const SET_DTR: u8 = 11;
    pub const SET_RTS: u8 = 12;
    pub const GET_LAST_ERROR: u8 = 13;
    pub const SET_PROGRESS: u8 = 14;
}

pub mod status {
    pub const OK: i32 = 0;
    pub const GENERIC_ERROR: i32 = -1024;
    pub const LAST_ERROR_IS_EMPTY: i32 = GENERIC_ERROR - 1;
    pub const INSUFFICIENT_BUFFER: i32 = GENERIC_ERROR - 2;
    pub const BUFFER_NULL: i32 = GENERIC_ERROR - 3;
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("stream closed")]
    Closed,

    #[error("truncated {opcode} payload: {source}")]
    Truncated {
        opcode: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Noop,
    Close,
    Read { length: i32, timeout_ms: i32 },
    Write { data: Vec<u8> },
    SetParameters { baud_rate: i32, data_bits: i32, stop_bits: i32, parity: i32 },
    GetControlLine(ControlLine),
    SetControlLine { line: ControlLine, asserted: bool },
    GetLastError { capacity: i32 },
    SetProgress { percent: i8, elapsed_ms: i32 },
    /// Unrecognized opcode; acknowledged silently.
    Unknown(u8),
}

impl Command {
    /// Read one complete frame. End of stream before the opcode yields
    /// [`FrameError::Closed`]; end of stream inside a payload yields
    /// [`FrameError::Truncated`].
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, FrameError> {
        let mut op = [0u8; 1];
        match reader.read_exact(&mut op) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
            Err(e) => return Err(FrameError::Io(e)),
        }
        let op = op[0];
        Self::read_payload(op, reader).map_err(|source| FrameError::Truncated {
            opcode: opcode_name(op),
            source,
        })
    }

    fn read_payload<R: Read + ?Sized>(op: u8, reader: &mut R) -> io::Result<Self> {
        let command = match op {
            opcode::NOOP => Command::Noop,
            opcode::CLOSE => Command::Close,
            opcode::READ => {
                let length = read_i32(reader)?;
                let timeout_ms = read_i32(reader)?;
                Command::Read { length, timeout_ms }
            }
            opcode::WRITE => {
                let count = read_i32(reader)?;
                let mut data = Vec::new();
                if count > 0 {
                    // grows with what actually arrives instead of trusting the header
                    (&mut *reader).take(count as u64).read_to_end(&mut data)?;
                    if data.len() < count as usize {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("expected {} bytes, got {}", count, data.len()),
                        ));
                    }
                }
                Command::Write { data }
            }
            opcode::SET_PARAMETERS => Command::SetParameters {
                baud_rate: read_i32(reader)?,
                data_bits: read_i32(reader)?,
                stop_bits: read_i32(reader)?,
                parity: read_i32(reader)?,
            },
            opcode::GET_CD => Command::GetControlLine(ControlLine::Cd),
            opcode::GET_CTS => Command::GetControlLine(ControlLine::Cts),
            opcode::GET_DSR => Command::GetControlLine(ControlLine::Dsr),
            opcode::GET_DTR => Command::GetControlLine(ControlLine::Dtr),
            opcode::GET_RI => Command::GetControlLine(ControlLine::Ri),
            opcode::GET_RTS => Command::GetControlLine(ControlLine::Rts),
            opcode::SET_DTR => Command::SetControlLine {
                line: ControlLine::Dtr,
                asserted: read_u8(reader)? == 1,
            },
            opcode::SET_RTS => Command::SetControlLine {
                line: ControlLine::Rts,
                asserted: read_u8(reader)? == 1,
            },
            opcode::GET_LAST_ERROR => Command::GetLastError { capacity: read_i32(reader)? },
            opcode::SET_PROGRESS => {
                let percent = read_u8(reader)? as i8;
                let elapsed_ms = read_i32(reader)?;
                Command::SetProgress { percent, elapsed_ms }
            }
            other => Command::Unknown(other),
        };
        Ok(command)
    }

    /// Encode as a client frame
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let mut frame = Vec::with_capacity(17);
        frame.push(self.opcode());
        match self {
            Command::Noop | Command::Close | Command::GetControlLine(_) | Command::Unknown(_) => {}
            Command::Read { length, timeout_ms } => {
                write_i32(&mut frame, *length);
                write_i32(&mut frame, *timeout_ms);
            }
            Command::Write { data } => {
                write_i32(&mut frame, payload_len(data.len())?);
                frame.extend_from_slice(data);
            }
            Command::SetParameters { baud_rate, data_bits, stop_bits, parity } => {
                for value in [baud_rate, data_bits, stop_bits, parity] {
                    write_i32(&mut frame, *value);
                }
            }
            Command::SetControlLine { asserted, .. } => frame.push(u8::from(*asserted)),
            Command::GetLastError { capacity } => write_i32(&mut frame, *capacity),
            Command::SetProgress { percent, elapsed_ms } => {
                frame.push(*percent as u8);
                write_i32(&mut frame, *elapsed_ms);
            }
        }
        writer.write_all(&frame)
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Command::Noop => opcode::NOOP,
            Command::Close => opcode::CLOSE,
            Command::Read { .. } => opcode::READ,
            Command::Write { .. } => opcode::WRITE,
            Command::SetParameters { .. } => opcode::SET_PARAMETERS,
            Command::GetControlLine(line) => match line {
                ControlLine::Cd => opcode::GET_CD,
                ControlLine::Cts => opcode::GET_CTS,
                ControlLine::Dsr => opcode::GET_DSR,
                ControlLine::Dtr => opcode::GET_DTR,
                ControlLine::Ri => opcode::GET_RI,
                ControlLine::Rts => opcode::GET_RTS,
            },
            // only DTR and RTS have a set opcode
            Command::SetControlLine { line, .. } => match line {
                ControlLine::Rts => opcode::SET_RTS,
                _ => opcode::SET_DTR,
            },
            Command::GetLastError { .. } => opcode::GET_LAST_ERROR,
            Command::SetProgress { .. } => opcode::SET_PROGRESS,
            Command::Unknown(op) => *op,
        }
    }

    pub fn name(&self) -> &'static str {
        opcode_name(self.opcode())
    }
}

pub fn opcode_name(op: u8) -> &'static str {
    match op {
        opcode::NOOP => "NOOP",
        opcode::CLOSE => "CLOSE",
        opcode::READ => "READ",
        opcode::WRITE => "WRITE",
        opcode::SET_PARAMETERS => "SET_PARAMETERS",
        opcode::GET_CD => "GET_CD",
        opcode::GET_CTS => "GET_CTS",
        opcode::GET_DSR => "GET_DSR",
        opcode::GET_DTR => "GET_DTR",
        opcode::GET_RI => "GET_RI",
        opcode::GET_RTS => "GET_RTS",
        opcode::SET_DTR => "SET_DTR",
        opcode::SET_RTS => "SET_RTS",
        opcode::GET_LAST_ERROR => "GET_LAST_ERROR",
        opcode::SET_PROGRESS => "SET_PROGRESS",
        _ => "UNKNOWN",
    }
}

/// One server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Bare status word
    Status(i32),
    /// `[length][bytes]`, used by READ and GET_LAST_ERROR
    Data(Vec<u8>),
    /// `[INSUFFICIENT_BUFFER][required length]`
    BufferTooSmall { required: i32 },
}

impl Response {
    pub fn ok() -> Self {
        Response::Status(status::OK)
    }

    pub fn error() -> Self {
        Response::Status(status::GENERIC_ERROR)
    }

    pub fn status(&self) -> i32 {
        match self {
            Response::Status(s) => *s,
            Response::Data(bytes) => bytes.len() as i32,
            Response::BufferTooSmall { .. } => status::INSUFFICIENT_BUFFER,
        }
    }

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        let mut frame = Vec::with_capacity(8);
        write_i32(&mut frame, self.status());
        match self {
            Response::Status(_) => writer.write_all(&frame),
            Response::Data(bytes) => {
                writer.write_all(&frame)?;
                writer.write_all(bytes)
            }
            Response::BufferTooSmall { required } => {
                write_i32(&mut frame, *required);
                writer.write_all(&frame)
            }
        }
    }
}

pub fn read_i32<R: Read + ?Sized>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

pub fn read_u8<R: Read + ?Sized>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Length prefix for a payload of `len` bytes; fails past `i32::MAX`
pub fn payload_len(len: usize) -> io::Result<i32> {
    i32::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("payload of {} bytes too large", len))
    })
}

pub fn write_i32(vec: &mut Vec<u8>, value: i32) {
    vec.extend_from_slice(&value.to_be_bytes());
}

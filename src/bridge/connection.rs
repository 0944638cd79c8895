use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use uuid::Uuid;

use super::{Progress, ServerOptions};
use crate::serial::protocol::{status, Command, FrameError, Response};
use crate::serial::{LineParameters, SerialDevice, SerialError};

/// Most recent failure seen on a connection, kept until the next one replaces it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub command: &'static str,
    pub message: String,
}

impl LastError {
    pub fn new(command: &'static str, error: &dyn fmt::Display) -> Self {
        Self { command, message: error.to_string() }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.command, self.message)
    }
}

/// What the loop does after a command has been answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

/// One serial device paired with the command and response streams of the
/// bridged process. Owned exclusively by the server thread.
pub struct Connection {
    session: Uuid,
    device: Box<dyn SerialDevice>,
    input: Box<dyn Read + Send>,
    output: Box<dyn Write + Send>,
    options: ServerOptions,
    last_error: Option<LastError>,
}

impl Connection {
    pub fn new(
        session: Uuid,
        device: Box<dyn SerialDevice>,
        input: Box<dyn Read + Send>,
        output: Box<dyn Write + Send>,
        options: ServerOptions,
    ) -> Self {
        Self {
            session,
            device,
            input,
            output,
            options,
            last_error: None,
        }
    }

    pub fn read_command(&mut self) -> Result<Command, FrameError> {
        Command::read_from(&mut self.input)
    }

    /// Run one command and write its response (if it has one).
    ///
    /// Only stream failures come back as `Err`; device failures are
    /// answered with the generic status and kept for GET_LAST_ERROR.
    pub fn dispatch(&mut self, command: Command, progress: &Progress) -> io::Result<Flow> {
        let name = command.name();
        let flow = match command {
            Command::Close => Flow::Terminate,
            _ => Flow::Continue,
        };

        let response = match command {
            Command::Unknown(op) => {
                log::warn!("[{}] ignoring unknown opcode 0x{:02x}", self.session, op);
                None
            }
            Command::GetLastError { capacity } => Some(self.last_error_response(capacity)),
            Command::SetProgress { percent, elapsed_ms } => {
                log::debug!("[{}] SET_PROGRESS percent={} elapsed={}ms", self.session, percent, elapsed_ms);
                progress.update(i32::from(percent), elapsed_ms);
                Some(Response::ok())
            }
            other => match self.execute(other) {
                Ok(response) => Some(response),
                Err(e) => {
                    log::warn!("[{}] {} failed: {}", self.session, name, e);
                    self.last_error = Some(LastError::new(name, &e));
                    Some(Response::error())
                }
            },
        };

        if let Some(response) = response {
            response.write_to(&mut self.output)?;
        }
        Ok(flow)
    }

    /// Device-backed commands. Errors propagate to [`Connection::dispatch`].
    fn execute(&mut self, command: Command) -> Result<Response, SerialError> {
        let name = command.name();
        match command {
            Command::Noop => Ok(Response::ok()),
            Command::Close => {
                log::debug!("[{}] CLOSE", self.session);
                self.device.close()?;
                Ok(Response::ok())
            }
            Command::Read { length, timeout_ms } => {
                let wanted = usize::try_from(length).unwrap_or(0).min(self.options.max_read_len);
                if wanted == 0 {
                    return Ok(Response::Data(Vec::new()));
                }
                let timeout = Duration::from_millis(u64::try_from(timeout_ms).unwrap_or(0));
                let mut buffer = vec![0u8; wanted];
                let read = self.device.read(&mut buffer, timeout)?;
                buffer.truncate(read.min(wanted));
                log::debug!(
                    "[{}] READ requested={} read={} timeout={}ms",
                    self.session, length, buffer.len(), timeout_ms
                );
                Ok(Response::Data(buffer))
            }
            Command::Write { data } => {
                let written = if data.is_empty() {
                    0
                } else {
                    self.device.write(&data, self.options.write_timeout())?
                };
                log::debug!("[{}] WRITE length={} written={}", self.session, data.len(), written);
                Ok(Response::Status(written as i32))
            }
            Command::SetParameters { baud_rate, data_bits, stop_bits, parity } => {
                log::debug!(
                    "[{}] SET_PARAMETERS baud={} data={} stop={} parity={}",
                    self.session, baud_rate, data_bits, stop_bits, parity
                );
                let params = LineParameters::from_wire(baud_rate, data_bits, stop_bits, parity)?;
                self.device.set_parameters(&params)?;
                Ok(Response::ok())
            }
            Command::GetControlLine(line) => {
                let level = self.device.control_line(line)?;
                log::debug!("[{}] GET_{} -> {}", self.session, line.name(), level);
                Ok(Response::Status(i32::from(level)))
            }
            Command::SetControlLine { line, asserted } => {
                log::debug!("[{}] SET_{} {}", self.session, line.name(), asserted);
                self.device.set_control_line(line, asserted)?;
                Ok(Response::ok())
            }
            Command::GetLastError { .. } | Command::SetProgress { .. } | Command::Unknown(_) => {
                Err(SerialError::ProtocolError(format!("{} is not a device command", name)))
            }
        }
    }

    fn last_error_response(&self, capacity: i32) -> Response {
        log::debug!("[{}] GET_LAST_ERROR capacity={}", self.session, capacity);
        let Some(error) = self.last_error.as_ref() else {
            return Response::Status(status::LAST_ERROR_IS_EMPTY);
        };
        if capacity < 0 {
            return Response::Status(status::BUFFER_NULL);
        }
        let message = error.to_string().into_bytes();
        if message.len() > capacity as usize {
            return Response::BufferTooSmall { required: message.len() as i32 };
        }
        Response::Data(message)
    }

    /// A payload was cut short by the stream. Record it and answer best-effort;
    /// the loop stops right after.
    pub fn fail_frame(&mut self, error: &FrameError) {
        let command = match error {
            FrameError::Truncated { opcode, .. } => *opcode,
            _ => "FRAME",
        };
        self.last_error = Some(LastError::new(command, error));
        if Response::error().write_to(&mut self.output).is_ok() {
            let _ = self.output.flush();
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }

    /// Close the device without having served anything
    pub fn abandon(mut self) {
        if let Err(e) = self.device.close() {
            log::debug!("[{}] device close on abandon: {}", self.session, e);
        }
    }
}

//! Client end of the bridge protocol.
//!
//! [`RemotePort`] lives on the bridged-process side: it writes command frames
//! and reads the replies, and it implements [`SerialDevice`] so code written
//! against a local port can run through the bridge unchanged.

use std::io::{Read, Write};
use std::time::Duration;

use crate::serial::protocol::{payload_len, read_i32, status, Command};
use crate::serial::{ControlLine, LineParameters, Result, SerialDevice, SerialError};

// Initial GET_LAST_ERROR capacity; grown once if the server says it is too small
const DEFAULT_ERROR_CAPACITY: i32 = 256;

pub struct RemotePort<R, W> {
    responses: R,
    commands: W,
    closed: bool,
}

impl<R: Read, W: Write> RemotePort<R, W> {
    /// `responses` carries server replies, `commands` carries our requests
    pub fn new(responses: R, commands: W) -> Self {
        Self {
            responses,
            commands,
            closed: false,
        }
    }

    pub fn noop(&mut self) -> Result<()> {
        self.send(&Command::Noop)?;
        let code = self.read_status()?;
        self.check(code).map(|_| ())
    }

    /// Report progress to the server's observer
    pub fn set_progress(&mut self, percent: u8, elapsed: Duration) -> Result<()> {
        let percent = percent.min(100) as i8;
        let elapsed_ms = i32::try_from(elapsed.as_millis()).unwrap_or(i32::MAX);
        self.send(&Command::SetProgress { percent, elapsed_ms })?;
        let code = self.read_status()?;
        self.check(code).map(|_| ())
    }

    /// Description of the server's most recent device failure, if any
    pub fn last_error(&mut self) -> Result<Option<String>> {
        let mut capacity = DEFAULT_ERROR_CAPACITY;
        loop {
            self.send(&Command::GetLastError { capacity })?;
            match self.read_status()? {
                status::LAST_ERROR_IS_EMPTY => return Ok(None),
                status::INSUFFICIENT_BUFFER => {
                    let required = read_i32(&mut self.responses)?;
                    if required <= capacity {
                        return Err(SerialError::ProtocolError(format!(
                            "server asked for {} bytes with {} offered",
                            required, capacity
                        )));
                    }
                    capacity = required;
                }
                length if length >= 0 => {
                    let mut message = vec![0u8; length as usize];
                    self.responses.read_exact(&mut message)?;
                    return Ok(Some(String::from_utf8_lossy(&message).into_owned()));
                }
                other => {
                    return Err(SerialError::ProtocolError(format!(
                        "unexpected GET_LAST_ERROR status {}",
                        other
                    )))
                }
            }
        }
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        if self.closed {
            return Err(SerialError::Closed);
        }
        command.write_to(&mut self.commands)?;
        self.commands.flush()?;
        Ok(())
    }

    fn read_status(&mut self) -> Result<i32> {
        Ok(read_i32(&mut self.responses)?)
    }

    /// Turn a status word into a result, fetching the failure text on error
    fn check(&mut self, code: i32) -> Result<i32> {
        match code {
            s if s >= 0 => Ok(s),
            status::GENERIC_ERROR => {
                let message = self
                    .last_error()?
                    .unwrap_or_else(|| "unknown device error".to_string());
                Err(SerialError::Remote(message))
            }
            other => Err(SerialError::ProtocolError(format!("unexpected status {}", other))),
        }
    }
}

impl<R, W> SerialDevice for RemotePort<R, W>
where
    R: Read + Send,
    W: Write + Send,
{
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        let length = i32::try_from(buffer.len()).unwrap_or(i32::MAX);
        // zero on the wire blocks, so sub-millisecond timeouts round up
        let mut timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        if !timeout.is_zero() {
            timeout_ms = timeout_ms.max(1);
        }
        self.send(&Command::Read { length, timeout_ms })?;
        let code = self.read_status()?;
        let count = self.check(code)? as usize;
        if count > buffer.len() {
            return Err(SerialError::ProtocolError(format!(
                "server returned {} bytes for a {} byte read",
                count,
                buffer.len()
            )));
        }
        self.responses.read_exact(&mut buffer[..count])?;
        Ok(count)
    }

    // The server applies its own write timeout
    fn write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize> {
        if payload_len(data.len()).is_err() {
            return Err(SerialError::InvalidParameter(format!(
                "{} byte write does not fit in one frame",
                data.len()
            )));
        }
        self.send(&Command::Write { data: data.to_vec() })?;
        let code = self.read_status()?;
        Ok(self.check(code)? as usize)
    }

    fn set_parameters(&mut self, params: &LineParameters) -> Result<()> {
        let [baud_rate, data_bits, stop_bits, parity] = params.to_wire();
        self.send(&Command::SetParameters { baud_rate, data_bits, stop_bits, parity })?;
        let code = self.read_status()?;
        self.check(code).map(|_| ())
    }

    fn control_line(&mut self, line: ControlLine) -> Result<bool> {
        self.send(&Command::GetControlLine(line))?;
        let code = self.read_status()?;
        Ok(self.check(code)? == 1)
    }

    fn set_control_line(&mut self, line: ControlLine, asserted: bool) -> Result<()> {
        if !line.is_output() {
            return Err(SerialError::Unsupported(format!("{} is an input line", line.name())));
        }
        self.send(&Command::SetControlLine { line, asserted })?;
        let code = self.read_status()?;
        self.check(code).map(|_| ())
    }

    fn close(&mut self) -> Result<()> {
        self.send(&Command::Close)?;
        self.closed = true;
        // the server stops after CLOSE, so the failure text cannot be fetched
        match self.read_status()? {
            status::OK => Ok(()),
            other => Err(SerialError::Remote(format!("close failed with status {}", other))),
        }
    }
}

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use super::{ControlLine, DataBits, LineParameters, Parity, Result, SerialError, StopBits};

pub const DEFAULT_BAUD_RATE: u32 = 115200;

// Slice used to poll when the caller asked for an unbounded read.
const BLOCKING_READ_SLICE: Duration = Duration::from_secs(1);

/// An already-open, already-permitted serial device.
///
/// A zero `timeout` on [`SerialDevice::read`] means "block until at least one
/// byte arrives"; otherwise a read that times out returns `Ok(0)`.
pub trait SerialDevice: Send {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize>;

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize>;

    fn set_parameters(&mut self, params: &LineParameters) -> Result<()>;

    fn control_line(&mut self, line: ControlLine) -> Result<bool>;

    /// Only valid for output lines (DTR, RTS).
    fn set_control_line(&mut self, line: ControlLine, asserted: bool) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl<T: SerialDevice + ?Sized> SerialDevice for Box<T> {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buffer, timeout)
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        (**self).write(data, timeout)
    }

    fn set_parameters(&mut self, params: &LineParameters) -> Result<()> {
        (**self).set_parameters(params)
    }

    fn control_line(&mut self, line: ControlLine) -> Result<bool> {
        (**self).control_line(line)
    }

    fn set_control_line(&mut self, line: ControlLine, asserted: bool) -> Result<()> {
        (**self).set_control_line(line, asserted)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// [`SerialDevice`] backed by a port opened through the `serialport` crate
pub struct SerialPortDevice {
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
    // serialport cannot read back the levels it drives
    dtr: bool,
    rts: bool,
}

impl SerialPortDevice {
    /// Open a port by name
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", port_name, e)))?;

        log::info!("Opened serial port {} at {} baud", port_name, baud_rate);
        Ok(Self::from_port(port))
    }

    /// Wrap a port somebody else already opened
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        let port_name = port.name().unwrap_or_else(|| "<unnamed>".to_string());
        Self {
            port: Some(port),
            port_name,
            dtr: false,
            rts: false,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(SerialError::Closed)
    }
}

impl SerialDevice for SerialPortDevice {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        if buffer.is_empty() {
            return Ok(0);
        }
        let port = self.port_mut()?;

        if timeout.is_zero() {
            port.set_timeout(BLOCKING_READ_SLICE)?;
            loop {
                match port.read(buffer) {
                    Ok(n) if n > 0 => return Ok(n),
                    Ok(_) => continue,
                    Err(ref e) if e.kind() == ErrorKind::TimedOut => continue,
                    Err(e) => return Err(SerialError::IoError(e)),
                }
            }
        }

        port.set_timeout(timeout)?;
        match port.read(buffer) {
            Ok(n) => Ok(n),
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(SerialError::IoError(e)),
        }
    }

    fn write(&mut self, data: &[u8], timeout: Duration) -> Result<usize> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;
        let mut written = 0;

        while written < data.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            port.set_timeout(remaining)?;
            match port.write(&data[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ErrorKind::TimedOut => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SerialError::IoError(e)),
            }
        }

        if written == 0 && !data.is_empty() {
            return Err(SerialError::Timeout);
        }
        port.flush().map_err(SerialError::IoError)?;
        Ok(written)
    }

    fn set_parameters(&mut self, params: &LineParameters) -> Result<()> {
        let data_bits = match params.data_bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        };
        let stop_bits = match params.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => {
                return Err(SerialError::Unsupported("1.5 stop bits".to_string()))
            }
        };
        let parity = match params.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
            Parity::Mark | Parity::Space => {
                return Err(SerialError::Unsupported(format!("{:?} parity", params.parity)))
            }
        };

        let port = self.port_mut()?;
        port.set_baud_rate(params.baud_rate)?;
        port.set_data_bits(data_bits)?;
        port.set_stop_bits(stop_bits)?;
        port.set_parity(parity)?;
        Ok(())
    }

    fn control_line(&mut self, line: ControlLine) -> Result<bool> {
        let (dtr, rts) = (self.dtr, self.rts);
        let port = self.port_mut()?;
        let level = match line {
            ControlLine::Cd => port.read_carrier_detect()?,
            ControlLine::Cts => port.read_clear_to_send()?,
            ControlLine::Dsr => port.read_data_set_ready()?,
            ControlLine::Ri => port.read_ring_indicator()?,
            ControlLine::Dtr => dtr,
            ControlLine::Rts => rts,
        };
        Ok(level)
    }

    fn set_control_line(&mut self, line: ControlLine, asserted: bool) -> Result<()> {
        let port = self.port_mut()?;
        match line {
            ControlLine::Dtr => port.write_data_terminal_ready(asserted)?,
            ControlLine::Rts => port.write_request_to_send(asserted)?,
            other => {
                return Err(SerialError::Unsupported(format!("{} is an input line", other.name())))
            }
        }
        match line {
            ControlLine::Dtr => self.dtr = asserted,
            _ => self.rts = asserted,
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        match self.port.take() {
            Some(_) => {
                log::info!("Closed serial port {}", self.port_name);
                Ok(())
            }
            None => Err(SerialError::Closed),
        }
    }
}

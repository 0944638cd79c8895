pub mod interface;
pub mod protocol;

pub use interface::{SerialDevice, SerialPortDevice};
pub use protocol::{Command, Response};

use serde::{Deserialize, Serialize};

/// Hardware signal lines exposed by a serial interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlLine {
    /// Carrier detect
    Cd,
    /// Clear to send
    Cts,
    /// Data set ready
    Dsr,
    /// Data terminal ready (output)
    Dtr,
    /// Ring indicator
    Ri,
    /// Request to send (output)
    Rts,
}

impl ControlLine {
    /// Lines the host drives; the rest are inputs and can only be read.
    pub fn is_output(self) -> bool {
        matches!(self, ControlLine::Dtr | ControlLine::Rts)
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlLine::Cd => "CD",
            ControlLine::Cts => "CTS",
            ControlLine::Dsr => "DSR",
            ControlLine::Dtr => "DTR",
            ControlLine::Ri => "RI",
            ControlLine::Rts => "RTS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Line settings requested by SET_PARAMETERS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineParameters {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
}

impl LineParameters {
    /// Decode the integer encoding used on the wire (USB-serial driver numbering).
    pub fn from_wire(baud_rate: i32, data_bits: i32, stop_bits: i32, parity: i32) -> Result<Self> {
        let baud_rate = u32::try_from(baud_rate)
            .ok()
            .filter(|b| *b > 0)
            .ok_or_else(|| SerialError::InvalidParameter(format!("baud rate {}", baud_rate)))?;
        let data_bits = match data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => return Err(SerialError::InvalidParameter(format!("data bits {}", other))),
        };
        let stop_bits = match stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            3 => StopBits::OnePointFive,
            other => return Err(SerialError::InvalidParameter(format!("stop bits {}", other))),
        };
        let parity = match parity {
            0 => Parity::None,
            1 => Parity::Odd,
            2 => Parity::Even,
            3 => Parity::Mark,
            4 => Parity::Space,
            other => return Err(SerialError::InvalidParameter(format!("parity {}", other))),
        };
        Ok(Self { baud_rate, data_bits, stop_bits, parity })
    }

    /// Inverse of [`LineParameters::from_wire`], in wire field order.
    pub fn to_wire(&self) -> [i32; 4] {
        let data_bits = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let stop_bits = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
            StopBits::OnePointFive => 3,
        };
        let parity = match self.parity {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
            Parity::Mark => 3,
            Parity::Space => 4,
        };
        [self.baud_rate as i32, data_bits, stop_bits, parity]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Device closed")]
    Closed,

    #[error("Communication timeout")]
    Timeout,

    #[error("Invalid line parameter: {0}")]
    InvalidParameter(String),

    #[error("Unsupported by device: {0}")]
    Unsupported(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Remote device error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_parameters_from_wire() {
        let params = LineParameters::from_wire(19200, 8, 1, 0).unwrap();
        assert_eq!(params.baud_rate, 19200);
        assert_eq!(params.data_bits, DataBits::Eight);
        assert_eq!(params.stop_bits, StopBits::One);
        assert_eq!(params.parity, Parity::None);
        assert_eq!(params.to_wire(), [19200, 8, 1, 0]);
    }

    #[test]
    fn test_line_parameters_driver_numbering() {
        let params = LineParameters::from_wire(9600, 7, 3, 4).unwrap();
        assert_eq!(params.stop_bits, StopBits::OnePointFive);
        assert_eq!(params.parity, Parity::Space);
    }

    #[test]
    fn test_line_parameters_rejects_garbage() {
        assert!(matches!(LineParameters::from_wire(0, 8, 1, 0), Err(SerialError::InvalidParameter(_))));
        assert!(matches!(LineParameters::from_wire(-5, 8, 1, 0), Err(SerialError::InvalidParameter(_))));
        assert!(matches!(LineParameters::from_wire(9600, 9, 1, 0), Err(SerialError::InvalidParameter(_))));
        assert!(matches!(LineParameters::from_wire(9600, 8, 0, 0), Err(SerialError::InvalidParameter(_))));
        assert!(matches!(LineParameters::from_wire(9600, 8, 1, 5), Err(SerialError::InvalidParameter(_))));
    }

    #[test]
    fn test_control_line_outputs() {
        assert!(ControlLine::Dtr.is_output());
        assert!(ControlLine::Rts.is_output());
        assert!(!ControlLine::Cd.is_output());
        assert!(!ControlLine::Ri.is_output());
    }
}

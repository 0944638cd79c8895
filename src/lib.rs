pub mod bridge;
pub mod config;
pub mod serial;

pub use bridge::{start_server, ProgrammerServer, ProgrammerServerBuilder, RemotePort, ServerOptions};
pub use config::BridgeConfig;
pub use serial::{SerialDevice, SerialError, SerialPortDevice};

pub mod client;
pub mod connection;
pub mod progress;
pub mod server;

pub use client::RemotePort;
pub use connection::{Connection, LastError};
pub use progress::{Progress, ProgressSnapshot};
pub use server::{start_server, ProgrammerServer, ProgrammerServerBuilder};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest single READ the server performs, whatever the client asks for
pub const MAX_READ_LEN: usize = 128 * 1024;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;

/// Tunables for one server instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub max_read_len: usize,
    pub write_timeout_ms: u64,
}

impl ServerOptions {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_read_len: MAX_READ_LEN,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Server already closed")]
    Closed,

    #[error("Failed to spawn server thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Server thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

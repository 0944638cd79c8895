use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::ServerOptions;
use crate::serial::interface::DEFAULT_BAUD_RATE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Bridge settings, usually loaded from a JSON file and then overridden
/// from the command line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Serial port to open (e.g. `/dev/ttyACM0`, `COM3`)
    pub port: Option<String>,
    pub baud_rate: u32,
    pub open_timeout_ms: u64,
    pub log_level: String,
    pub server: ServerOptions,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            open_timeout_ms: 1000,
            log_level: "info".to_string(),
            server: ServerOptions::default(),
        }
    }
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".to_string()));
        }
        if self.server.max_read_len == 0 || self.server.max_read_len > i32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "server.max_read_len out of range: {}",
                self.server.max_read_len
            )));
        }
        if self.server.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid("server.write_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{DEFAULT_WRITE_TIMEOUT_MS, MAX_READ_LEN};

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.server.max_read_len, MAX_READ_LEN);
        assert_eq!(config.server.write_timeout_ms, DEFAULT_WRITE_TIMEOUT_MS);
        assert!(config.port.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = BridgeConfig::from_json(r#"{ "port": "/dev/ttyACM0", "server": { "write_timeout_ms": 250 } }"#).unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.server.write_timeout_ms, 250);
        assert_eq!(config.server.max_read_len, MAX_READ_LEN);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_rejects_zero_read_len() {
        let err = BridgeConfig::from_json(r#"{ "server": { "max_read_len": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_write_timeout() {
        let err = BridgeConfig::from_json(r#"{ "server": { "write_timeout_ms": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let mut config = BridgeConfig::default();
        config.server.write_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(BridgeConfig::from_json("{ port: "), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, r#"{ "baud_rate": 57600, "log_level": "debug" }"#).unwrap();
        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_missing_file() {
        let err = BridgeConfig::load(Path::new("/nonexistent/bridge.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

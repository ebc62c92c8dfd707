//! Configuration management for RAX FTP
//!
//! Both ends read an optional TOML file, then environment overrides
//! (`RAX_FTP_*` for the server, `RAX_FTP_CLIENT_*` for the client). Missing
//! keys fall back to the defaults below.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Server settings, fixed for the lifetime of the process.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    // ═══ NETWORK ═══
    /// IP address the control listener binds to.
    pub bind_address: String,
    /// Control port; 0 picks an ephemeral port.
    pub control_port: u16,
    /// PASV listener port range; `0..=0` picks an ephemeral port per offer.
    pub data_port_min: u16,
    pub data_port_max: u16,

    /// Directory exposed to clients as `/`.
    pub server_root: String,

    // ═══ TIMEOUTS AND LIMITS ═══
    /// Idle time allowed between control commands.
    pub connection_timeout_secs: u64,
    /// Bound on data connection setup and each chunk moved.
    pub data_timeout_secs: u64,
    pub buffer_size: usize,
    pub max_command_length: usize,
    pub max_clients: usize,
    pub max_username_length: usize,
    /// Lowest port a PORT command may name.
    pub min_client_port: u16,

    // ═══ ACCOUNTS ═══
    /// Accept `anonymous` and `ftp` with any password.
    pub allow_anonymous: bool,
    pub users: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            control_port: 2121,
            data_port_min: 0,
            data_port_max: 0,
            server_root: "./server_root".to_string(),
            connection_timeout_secs: 300,
            data_timeout_secs: 30,
            buffer_size: 8192,
            max_command_length: 512,
            max_clients: 10,
            max_username_length: 32,
            min_client_port: 1024,
            allow_anonymous: true,
            users: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Load `config.toml` from the working directory with environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load from `path` (extension optional) with environment overrides.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("RAX_FTP").try_parsing(true))
            .build()?;
        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_port_min > self.data_port_max {
            return Err(ConfigError::Message(
                "data_port_min must not exceed data_port_max".into(),
            ));
        }

        if self.data_port_min == 0 && self.data_port_max != 0 {
            return Err(ConfigError::Message(
                "data_port_min must be set when data_port_max is".into(),
            ));
        }

        if self.server_root.is_empty() {
            return Err(ConfigError::Message("server_root cannot be empty".into()));
        }

        if self.max_clients == 0 {
            return Err(ConfigError::Message(
                "max_clients must be greater than 0".into(),
            ));
        }

        if self.buffer_size == 0 {
            return Err(ConfigError::Message(
                "buffer_size must be greater than 0".into(),
            ));
        }

        if self.max_command_length < 16 {
            return Err(ConfigError::Message(
                "max_command_length must be at least 16".into(),
            ));
        }

        if self.connection_timeout_secs == 0 || self.data_timeout_secs == 0 {
            return Err(ConfigError::Message("timeouts must be non-zero".into()));
        }

        Ok(())
    }

    /// Get bind address and control port as socket address
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.bind_address, self.control_port)
    }

    /// PASV port range, or `None` for ephemeral ports.
    pub fn data_port_range(&self) -> Option<RangeInclusive<u16>> {
        if self.data_port_max == 0 {
            None
        } else {
            Some(self.data_port_min..=self.data_port_max)
        }
    }

    pub fn server_root_path(&self) -> PathBuf {
        PathBuf::from(&self.server_root)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_secs)
    }
}

/// Client settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Bound on establishing the control connection.
    pub connect_timeout_secs: u64,
    /// Bound on every control-channel read and write.
    pub control_timeout_secs: u64,
    /// Bound on data connection setup and each chunk moved.
    pub data_timeout_secs: u64,
    pub buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            control_timeout_secs: 60,
            data_timeout_secs: 30,
            buffer_size: 8192,
        }
    }
}

impl ClientConfig {
    /// Load from `path` (extension optional) with `RAX_FTP_CLIENT_*` overrides.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("RAX_FTP_CLIENT").try_parsing(true))
            .build()?;
        let config: ClientConfig = settings.try_deserialize()?;
        if config.connect_timeout_secs == 0
            || config.control_timeout_secs == 0
            || config.data_timeout_secs == 0
        {
            return Err(ConfigError::Message("timeouts must be non-zero".into()));
        }
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn data_timeout(&self) -> Duration {
        Duration::from_secs(self.data_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.data_port_range(), None);
        assert_eq!(config.control_socket(), "127.0.0.1:2121");
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "control_port = 2222\ndata_port_min = 50000\ndata_port_max = 50010\n\n[users]\ncarol = \"pw\""
        )
        .unwrap();

        let config = ServerConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.control_port, 2222);
        assert_eq!(config.data_port_range(), Some(50000..=50010));
        assert_eq!(config.users.get("carol").map(String::as_str), Some("pw"));
        assert_eq!(config.max_clients, 10);
    }

    #[test]
    fn rejects_inverted_port_range() {
        let config = ServerConfig {
            data_port_min: 6000,
            data_port_max: 5000,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            max_clients: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_client_file_uses_defaults() {
        let config = ClientConfig::load_from("definitely-not-a-config-file").unwrap();
        assert_eq!(config.data_timeout(), Duration::from_secs(30));
        assert_eq!(config.buffer_size, 8192);
    }
}

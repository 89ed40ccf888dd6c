//! Server configuration
//!
//! Zero heartbeat durations disable the heartbeat and the pong watchdog.

use skiff_core::error::{ConfigError, Error};
use skiff_core::peer::Timing;
use skiff_core::protocol::constants;
use skiff_core::socket::SocketConfig;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address as `host:port`
    pub bind_address: String,
    /// Request path accepting WebSocket upgrades
    pub ws_path: String,
    /// Maximum concurrent socket connections
    pub max_connections: usize,
    /// Time allowed for a request head to arrive
    pub handshake_timeout: Duration,
    /// Read buffer size in bytes
    pub read_buffer_size: usize,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
    /// Maximum frame size in bytes
    pub max_frame_size: usize,
    /// Maximum HTTP request body in bytes
    pub max_body_size: usize,
    /// Period between heartbeats sent to each peer
    pub heartbeat_interval: Duration,
    /// Silence tolerated before a peer is dropped
    pub heartbeat_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            ws_path: constants::DEFAULT_PATH.to_string(),
            max_connections: 10_000,
            handshake_timeout: constants::DEFAULT_HANDSHAKE_TIMEOUT,
            read_buffer_size: constants::DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: constants::DEFAULT_WRITE_BUFFER_SIZE,
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
            max_body_size: constants::DEFAULT_MAX_BODY_SIZE,
            heartbeat_interval: Duration::ZERO,
            heartbeat_timeout: Duration::ZERO,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> skiff_core::Result<()> {
        if self.bind_address.is_empty() {
            return Err(Error::Config(ConfigError::MissingField {
                field: "bind_address".to_string(),
            }));
        }

        if !self.ws_path.starts_with('/') {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "ws_path".to_string(),
                value: self.ws_path.clone(),
            }));
        }

        if self.max_connections == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_connections must be greater than 0".to_string(),
            )));
        }

        if self.handshake_timeout.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "handshake_timeout must be greater than 0".to_string(),
            )));
        }

        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "buffer sizes must be greater than 0".to_string(),
            )));
        }

        if self.max_frame_size == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_frame_size must be greater than 0".to_string(),
            )));
        }

        Ok(())
    }

    pub(crate) fn socket(&self) -> SocketConfig {
        SocketConfig {
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            max_frame_size: self.max_frame_size,
        }
    }

    pub(crate) fn timing(&self) -> Timing {
        Timing {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ws_path, "/");
        assert_eq!(config.max_connections, 10_000);
        assert!(config.timing().heartbeat_interval.is_zero());
    }

    #[test]
    fn test_server_config_validation() {
        let mut config = ServerConfig::default();
        config.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.ws_path = "ws".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.handshake_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}

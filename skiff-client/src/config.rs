//! Client configuration for Skiff
//!
//! Connection settings are plain data. Zero durations disable the
//! heartbeat, the pong watchdog and reconnecting respectively.

use skiff_core::error::ConfigError;
use skiff_core::peer::Timing;
use skiff_core::protocol::constants;
use skiff_core::socket::SocketConfig;
use skiff_core::{Error, Result};
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address as `host:port`
    pub addr: String,
    /// Request path of the upgrade
    pub path: String,
    /// URL scheme; only `ws` is supported
    pub scheme: String,
    /// Time allowed for dialing plus the opening handshake
    pub handshake_timeout: Duration,
    /// Read buffer size in bytes
    pub read_buffer_size: usize,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
    /// Maximum frame size in bytes
    pub max_frame_size: usize,
    /// Period between heartbeats
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the connection is dropped
    pub heartbeat_timeout: Duration,
    /// Delay before reconnecting after a failure or close
    pub reconnect_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            path: constants::DEFAULT_PATH.to_string(),
            scheme: constants::DEFAULT_SCHEME.to_string(),
            handshake_timeout: constants::DEFAULT_HANDSHAKE_TIMEOUT,
            read_buffer_size: constants::DEFAULT_READ_BUFFER_SIZE,
            write_buffer_size: constants::DEFAULT_WRITE_BUFFER_SIZE,
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
            heartbeat_interval: Duration::ZERO,
            heartbeat_timeout: Duration::ZERO,
            reconnect_interval: Duration::ZERO,
        }
    }
}

impl ClientConfig {
    /// Configuration for `addr` with every other field defaulted
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.addr.is_empty() {
            return Err(Error::Config(ConfigError::MissingField {
                field: "addr".to_string(),
            }));
        }

        if self.scheme != constants::DEFAULT_SCHEME {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "scheme".to_string(),
                value: self.scheme.clone(),
            }));
        }

        if !self.path.starts_with('/') {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "path".to_string(),
                value: self.path.clone(),
            }));
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

    /// Full URL of the endpoint
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.addr, self.path)
    }

    /// Set the request path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the URL scheme
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the write buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set the maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the pong timeout
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the reconnect delay
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
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
    fn test_client_config_default() {
        let config = ClientConfig::new("127.0.0.1:8080");
        assert!(config.validate().is_ok());
        assert_eq!(config.path, "/");
        assert_eq!(config.scheme, "ws");
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.write_buffer_size, 1024);
        assert!(config.heartbeat_interval.is_zero());
        assert_eq!(config.url(), "ws://127.0.0.1:8080/");
    }

    #[test]
    fn test_client_config_validation() {
        assert!(ClientConfig::default().validate().is_err());
        assert!(ClientConfig::new("a:1").scheme("wss").validate().is_err());
        assert!(ClientConfig::new("a:1").path("ws").validate().is_err());
        assert!(ClientConfig::new("a:1")
            .handshake_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ClientConfig::new("a:1").read_buffer_size(0).validate().is_err());
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("a:1")
            .path("/ws")
            .heartbeat_interval(Duration::from_secs(15))
            .heartbeat_timeout(Duration::from_secs(30))
            .reconnect_interval(Duration::from_secs(1));

        assert_eq!(config.url(), "ws://a:1/ws");
        assert_eq!(config.timing().heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.timing().heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect_interval, Duration::from_secs(1));
    }
}

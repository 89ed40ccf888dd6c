//! Error types for Skiff
//!
//! Every fallible operation in the workspace returns [`Result`], whose error
//! is the [`Error`] enum below. Sub-enums group failures by the layer that
//! produced them so callers can match on the part they care about.

#![allow(missing_docs)]

use std::time::Duration;
use thiserror::Error;

/// Result type alias for Skiff operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error accepted from user handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Comprehensive error type for Skiff operations
#[derive(Error, Debug)]
pub enum Error {
    /// Handshake and carrier protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Carrier frame errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Routing errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// Field coercion errors
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// JSON encoding errors
    #[cfg(feature = "json")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error raised by a user handler or hook
    #[error("Handler error: {0}")]
    Handler(#[source] BoxError),

    /// The connection is not open
    #[error("Connection closed")]
    Closed,

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Wrap any error produced by user code
    pub fn handler<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Handler(err.into())
    }

    /// Create a generic error from a message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Whether this error reports a missing route
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Dispatch(DispatchError::NotFound { .. }))
    }
}

/// Handshake errors
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// Missing required headers
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// Invalid header value
    #[error("Invalid header value for {header}: {value}")]
    InvalidHeaderValue { header: String, value: String },

    /// Invalid HTTP method
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Malformed request or response head
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Unsupported WebSocket version
    #[error("Unsupported WebSocket version")]
    UnsupportedVersion,

    /// Unexpected HTTP status
    #[error("Unexpected HTTP status: {0}")]
    UnexpectedStatus(u16),

    /// Invalid accept key
    #[error("Invalid WebSocket accept key - expected: {expected}, received: {received}")]
    InvalidAcceptKey { expected: String, received: String },

    /// Head exceeded the allowed size
    #[error("Header too large: more than {max} bytes")]
    HeaderTooLarge { max: usize },
}

/// Carrier frame parsing errors
#[derive(Error, Debug, Clone)]
pub enum FrameError {
    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// Invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Reserved bits set
    #[error("Reserved bits set in frame")]
    ReservedBitsSet,

    /// Control frames cannot be fragmented
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Continuation with no message in progress, or a new message inside one
    #[error("Unexpected continuation state")]
    UnexpectedContinuation,

    /// Text frame with invalid UTF-8
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Missing required configuration
    #[error("Missing required configuration: {field}")]
    MissingField { field: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Routing errors
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// No route matched the event or path
    #[error("{target} 404 not found")]
    NotFound { target: String },
}

/// Timeout errors
#[derive(Error, Debug, Clone)]
pub enum TimeoutError {
    /// Handshake timeout
    #[error("Handshake timeout: {timeout:?}")]
    Handshake { timeout: Duration },

    /// No pong within the heartbeat timeout
    #[error("Heartbeat timeout: {timeout:?}")]
    Heartbeat { timeout: Duration },
}

/// Field coercion errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    /// The raw value could not be coerced into the requested kind
    #[error("field {field}: cannot read {value:?} as {expected}")]
    Coerce {
        field: String,
        value: String,
        expected: &'static str,
    },

    /// A required field was absent
    #[error("field {field} is missing")]
    Missing { field: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_embeds_target() {
        let err = Error::from(DispatchError::NotFound {
            target: "/chat/join".to_string(),
        });
        assert!(err.to_string().contains("/chat/join"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_handler_error_keeps_source() {
        let err = Error::handler("boom");
        assert!(matches!(err, Error::Handler(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let cfg: Error = ConfigError::MissingField {
            field: "on_open".into(),
        }
        .into();
        assert!(cfg.to_string().contains("on_open"));
    }
}

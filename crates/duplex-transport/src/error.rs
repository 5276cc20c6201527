//! Error handling for the session layer.
//!
//! Runtime failures (socket errors, rejected handshakes, malformed frames)
//! are recovered inside the connection engine and only show up in logs and
//! state transitions. `TransportError` is what constructors and the
//! collaborator seams return.

use std::time::Duration;

use duplex_wire::WireError;
use thiserror::Error;

/// The main result type used throughout the transport layer.
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or handshake failure.
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Envelope encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint URL could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The connection went away.
    #[error("Connection closed: {}", reason.as_deref().unwrap_or("no reason"))]
    ConnectionClosed { reason: Option<String> },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl TransportError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TransportError::config("host cannot be empty");
        assert!(matches!(err, TransportError::Config { .. }));
        assert_eq!(err.to_string(), "Configuration error: host cannot be empty");

        let err = TransportError::timeout(Duration::from_secs(5));
        assert!(matches!(err, TransportError::Timeout { .. }));

        let err = TransportError::connection_closed(None);
        assert_eq!(err.to_string(), "Connection closed: no reason");

        let err = TransportError::from(WireError::InvalidStatusCode(403));
        assert_eq!(err.to_string(), "Wire error: Invalid status code: 403");
    }
}

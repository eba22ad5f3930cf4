//! # Error Types
//!
//! Custom error types for ELRS Link using `thiserror`.

use std::time::Duration;
use thiserror::Error;

/// Main error type for ELRS Link
#[derive(Debug, Error)]
pub enum ElrsLinkError {
    /// Serial transport open/read/write failures. Fatal to the task that hit them.
    #[error("Serial port error: {0}")]
    Port(String),

    /// CRSF protocol errors (bad checksum, malformed frame)
    #[error("CRSF protocol error: {0}")]
    Protocol(String),

    /// A supervisor or task was started while already running
    #[error("{0} is already active")]
    AlreadyActive(&'static str),

    /// The link did not become active within the caller's bound
    #[error("Timed out after {0:?} waiting for link")]
    Timeout(Duration),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ElrsLinkError {
    /// True for errors a receive loop counts and moves past.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ElrsLinkError::Protocol(_))
    }
}

/// Result type alias for ELRS Link
pub type Result<T> = std::result::Result<T, ElrsLinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_are_recoverable() {
        assert!(ElrsLinkError::Protocol("crc".into()).is_recoverable());
        assert!(!ElrsLinkError::Port("gone".into()).is_recoverable());
        assert!(!ElrsLinkError::AlreadyActive("send loop").is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ElrsLinkError::AlreadyActive("link supervisor").to_string(),
            "link supervisor is already active"
        );
        assert!(ElrsLinkError::Timeout(Duration::from_secs(5))
            .to_string()
            .contains("5s"));
    }
}

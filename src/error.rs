//! replog Error Types

use thiserror::Error;

/// Result type alias for replog operations
pub type Result<T> = std::result::Result<T, Error>;

/// replog error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // Log errors
    #[error("Log already holds an entry with id {0}")]
    DuplicateEntry(u64),

    #[error("Invalid write concern {0}, expected 0..=3")]
    InvalidWriteConcern(u8),

    // Protocol errors
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Frame checksum mismatch")]
    ChecksumMismatch,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Replication errors
    #[error("Acknowledgement refers to unknown message {0}")]
    UnknownMessage(u64),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::Network(_)
                | Error::Io(_)
        )
    }

    /// Check if this error only affects the frame it was raised for
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Error::MalformedFrame(_)
                | Error::ChecksumMismatch
                | Error::Serialization(_)
                | Error::InvalidWriteConcern(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::ConnectionTimeout("10.0.0.2:7654".into()).is_retryable());
        assert!(Error::ConnectionFailed {
            address: "10.0.0.2:7654".into(),
            reason: "connection refused".into(),
        }
        .is_retryable());
        assert!(!Error::DuplicateEntry(3).is_retryable());
        assert!(!Error::MalformedFrame("bad".into()).is_retryable());
    }

    #[test]
    fn test_frame_local_classification() {
        assert!(Error::ChecksumMismatch.is_frame_local());
        assert!(Error::InvalidWriteConcern(9).is_frame_local());
        assert!(!Error::UnknownMessage(1).is_frame_local());
    }
}

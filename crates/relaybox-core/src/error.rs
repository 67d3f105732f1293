//! Error types for relaybox

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// No principal with this username is known to the directory
    #[error("Principal not found: {0}")]
    PrincipalNotFound(String),

    /// Principal exists but has no public key to seal against
    #[error("Principal has no public key: {0}")]
    MissingPublicKey(String),

    /// Username contains characters that are not allowed
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Remote host is not configured
    #[error("Unknown remote host: {0}")]
    UnknownRemoteHost(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Decryption failed (wrong key, tampered data, or malformed input)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// RSA key wrapping error
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// PEM/DER key encoding error
    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    /// Caller metadata cannot be sealed
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Envelope files are missing or inconsistent
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No free envelope ordinal left in a directory
    #[error("No free envelope name in {0}")]
    NamesExhausted(PathBuf),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A job body panicked
    #[error("Job panicked: {0}")]
    JobPanicked(String),

    /// The job scheduler is no longer accepting jobs
    #[error("Job scheduler has stopped")]
    SchedulerStopped,

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether this error means a principal could not be used as a target.
    ///
    /// Resolution errors never leave envelope files behind.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            RelayError::PrincipalNotFound(_)
                | RelayError::MissingPublicKey(_)
                | RelayError::InvalidUsername(_)
                | RelayError::UnknownRemoteHost(_)
        )
    }
}

/// Result type alias using RelayError
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::PrincipalNotFound("bob".to_string());
        assert_eq!(format!("{}", err), "Principal not found: bob");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let relay_err: RelayError = io_err.into();
        assert!(matches!(relay_err, RelayError::Io(_)));
    }

    #[test]
    fn test_resolution_classification() {
        assert!(RelayError::MissingPublicKey("carol".into()).is_resolution());
        assert!(RelayError::UnknownRemoteHost("mars".into()).is_resolution());
        assert!(!RelayError::SchedulerStopped.is_resolution());
        assert!(!RelayError::JobPanicked("boom".into()).is_resolution());
        assert!(!RelayError::Crypto("bad".into()).is_resolution());
    }
}

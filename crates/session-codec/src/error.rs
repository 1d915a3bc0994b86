//! Session codec errors.

use thiserror::Error;

/// Errors raised while decoding a container or validating a triplet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Container truncated: need at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unrecognized container magic")]
    BadMagic,

    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u32),

    /// Wrong local secret or tampered ciphertext.
    #[error("Integrity check failed")]
    IntegrityCheck,

    #[error("Corrupt container: {0}")]
    Corrupt(String),

    #[error("Malformed session structure: {0}")]
    Malformed(String),

    #[error("Invalid triplet: {0}")]
    InvalidTriplet(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

impl From<base64::DecodeError> for DecodeError {
    fn from(e: base64::DecodeError) -> Self {
        DecodeError::Malformed(format!("auth_key is not valid base64: {}", e))
    }
}

//! Ledger errors.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Attempt already recorded: {0}")]
    DuplicateEntry(Uuid),

    #[error("Attempt not found: {0}")]
    NotFound(Uuid),

    #[error("Ledger corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

// Storage error types

use configgate_types::ValueParseError;
use thiserror::Error;

/// Marker raised by the plaintext guard triggers.
pub const PLAINTEXT_BLOCK_MARKER: &str = "SECURITY_BLOCK";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored value is malformed: {0}")]
    Value(#[from] ValueParseError),
}

impl StoreError {
    /// True when a plaintext guard trigger rejected the write.
    pub fn is_plaintext_block(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.message().contains(PLAINTEXT_BLOCK_MARKER),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

//! Error types for the publication engine.

use crate::types::DocumentId;
use thiserror::Error;

/// Main error type for store and feed operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(DocumentId),

    #[error("Consumer fell behind the change feed; resynchronize from a fresh snapshot")]
    BackpressureExceeded,

    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

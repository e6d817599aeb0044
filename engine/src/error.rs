//! Error types for the mirrorsync engine.

use crate::{CollectionName, RecordKey};
use thiserror::Error;

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Handler / connection errors
    #[error("connection to '{handler}' failed: {reason}")]
    ConnectionFailed { handler: String, reason: String },

    #[error("handler '{0}' is not connected")]
    NotConnected(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("failed to create collection '{collection}': {reason}")]
    CollectionCreateFailed {
        collection: CollectionName,
        reason: String,
    },

    #[error("record not found: {0}")]
    RecordNotFound(RecordKey),

    // Validation errors
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Fingerprinting errors. Checksum computation is pure and only fails
    // on unserializable input, which is a programming error upstream.
    #[error("record could not be serialized for checksum: {0}")]
    Unserializable(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

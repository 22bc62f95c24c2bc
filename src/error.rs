use std::time::Duration;

use thiserror::Error;

/// Main error type for fathom operations
#[derive(Error, Debug)]
pub enum FathomError {
    /// On-disk bytes do not match the expected layout (bad magic, header,
    /// block length or record version).
    #[error("Format error: {0}")]
    Format(String),

    /// An API was called out of sequence, e.g. starting a term twice or
    /// adding a document to a committed writer.
    #[error("State error: {0}")]
    State(String),

    /// A document referenced a field the schema does not declare.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The index write lock could not be acquired in time.
    #[error("Lock error: could not acquire {name} within {timeout:?}")]
    Lock { name: String, timeout: Duration },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Document {docnum} out of range (doc count {doc_count})")]
    DocumentOutOfRange { docnum: u32, doc_count: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type alias for fathom operations
pub type Result<T> = std::result::Result<T, FathomError>;

impl FathomError {
    pub fn format(msg: impl Into<String>) -> Self {
        FathomError::Format(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        FathomError::State(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        FathomError::Schema(msg.into())
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        FathomError::InvalidValue(msg.into())
    }

    /// Wrap a failed read of a binary record as a format error.
    pub fn truncated(what: &str, err: std::io::Error) -> Self {
        FathomError::Format(format!("truncated {}: {}", what, err))
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, FathomError::Lock { .. })
    }
}

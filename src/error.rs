//! Error kinds for attachment storage.
//!
//! Import failures, metadata persistence failures and integrity violations
//! are distinct types so batch paths can downgrade one kind and propagate
//! another. [`Error`] is the union returned by the repository façade.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the vault's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure while copying bytes from an external source into the store.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The source handle could not be opened or read.
    #[error("source unreadable: {source_uri}: {reason}")]
    SourceUnreadable { source_uri: String, reason: String },

    /// The destination file inside the storage root could not be written.
    #[error("cannot write destination {}: {reason}", path.display())]
    Destination { path: PathBuf, reason: String },

    /// The stream ended before the length the source announced.
    #[error("source truncated: expected {expected} bytes, read {actual}")]
    Truncated { expected: u64, actual: u64 },

    /// The stream exceeded the configured import limit.
    #[error("source exceeds import limit of {limit} bytes")]
    TooLarge { limit: u64 },
}

/// Failure of a metadata store operation. The responsible transaction has
/// already been rolled back when this is returned.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("attachment not found: {0}")]
    UnknownAttachment(String),

    #[error("document not found: {0}")]
    UnknownDocument(String),
}

/// A record exists but its backing file does not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("integrity violation: attachment {attachment_id} has no file at {}", storage_path.display())]
pub struct IntegrityViolation {
    pub attachment_id: String,
    pub storage_path: PathBuf,
}

/// Core error type for attachment operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Persistence(PersistenceError::Database(e))
    }
}

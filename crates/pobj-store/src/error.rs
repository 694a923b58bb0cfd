use std::io;
use std::path::PathBuf;

/// Errors from storage media.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error from the underlying file system.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure of the medium's own format.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A database file exists but cannot be read back.
    #[error("corrupt store at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The remote authority cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

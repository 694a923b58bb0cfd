use std::io;
use std::path::PathBuf;

use pobj_codec::CodecError;
use pobj_store::StoreError;

/// Errors from backend operations.
///
/// A failed operation leaves any in-memory value untouched; callers decide
/// whether to log, retry, or surface it.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The value could not be encoded for storage.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The storage medium rejected the operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// File system failure on a file-backed record.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The key cannot address a record in this medium.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

use thiserror::Error;

/// Errors produced while encoding or decoding a persisted payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The value could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The stored bytes could not be turned back into a value.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The envelope does not start with the expected magic bytes.
    #[error("bad envelope magic: {0:02x?}")]
    BadMagic([u8; 4]),

    /// The envelope was written by an unknown format version.
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    /// The envelope is shorter than its header claims.
    #[error("truncated envelope: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    /// Bytes follow the payload the header describes.
    #[error("{0} trailing bytes after envelope payload")]
    TrailingBytes(usize),

    /// The payload is too long for the envelope's length field.
    #[error("payload of {0} bytes exceeds the envelope limit")]
    PayloadTooLarge(usize),

    /// Payload checksum does not match (torn or corrupted write).
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Convenience alias used throughout the codec crate.
pub type CodecResult<T> = Result<T, CodecError>;

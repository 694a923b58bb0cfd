use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CodecError, CodecResult};

/// Turns a domain value into an opaque byte buffer and back.
///
/// Backends never inspect the bytes a codec produces. A decode error is not
/// fatal to anyone: backends degrade it to "no value".
pub trait Codec<T>: Send + Sync {
    /// Serialize `value` into a byte buffer.
    fn encode(&self, value: &T) -> CodecResult<Bytes>;

    /// Deserialize a value previously produced by [`Codec::encode`].
    fn decode(&self, data: &[u8]) -> CodecResult<T>;
}

/// Compact binary codec backed by `bincode`.
#[derive(Clone, Copy, Default)]
pub struct BincodeCodec;

impl<T> Codec<T> for BincodeCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> CodecResult<Bytes> {
        bincode::serialize(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> CodecResult<T> {
        bincode::deserialize(data).map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}

impl fmt::Debug for BincodeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BincodeCodec")
    }
}

/// Human-readable codec backed by `serde_json`.
///
/// Required for self-describing values such as `serde_json::Value`, which
/// bincode cannot decode.
#[derive(Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit indented JSON.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> CodecResult<Bytes> {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        encoded
            .map(Bytes::from)
            .map_err(|e| CodecError::Serialization(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> CodecResult<T> {
        serde_json::from_slice(data).map_err(|e| CodecError::Deserialization(e.to_string()))
    }
}

impl fmt::Debug for JsonCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec").field("pretty", &self.pretty).finish()
    }
}

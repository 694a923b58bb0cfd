//! Payload codecs for persistent objects.
//!
//! The persistence core treats a value's serialized form as an opaque byte
//! buffer. This crate supplies the [`Codec`] boundary plus two stock
//! implementations, and the checksummed [`envelope`] that file-based media
//! wrap around every record so torn or corrupted writes read back as
//! "no value" instead of garbage.

pub mod codec;
pub mod envelope;
pub mod error;

pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use envelope::EnvelopeHeader;
pub use error::{CodecError, CodecResult};

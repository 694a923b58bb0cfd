//! Checksummed envelope around persisted payload bytes.
//!
//! On-disk format:
//! ```text
//! [4 bytes: magic "POBJ"]
//! [1 byte:  format version]
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload]
//! ```
//!
//! A record that fails any check is reported as a [`CodecError`]; callers
//! treat that the same as a record that was never written.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, CodecResult};

/// Leading bytes of every envelope.
pub const MAGIC: [u8; 4] = *b"POBJ";

/// Current envelope format version.
pub const VERSION: u8 = 1;

/// Magic + version + length + CRC.
pub const HEADER_SIZE: usize = 13;

/// Decoded envelope header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub version: u8,
    pub payload_len: u32,
    pub checksum: u32,
}

/// Wrap `payload` in an envelope.
///
/// Fails with [`CodecError::PayloadTooLarge`] if the length does not fit the
/// header's `u32` field.
pub fn seal(payload: &[u8]) -> CodecResult<Bytes> {
    let len = payload_len(payload.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&MAGIC);
    buf.put_u8(VERSION);
    buf.put_u32_le(len);
    buf.put_u32_le(crc32fast::hash(payload));
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn payload_len(len: usize) -> CodecResult<u32> {
    u32::try_from(len).map_err(|_| CodecError::PayloadTooLarge(len))
}

/// Parse and validate the header of an envelope without checking the payload.
pub fn inspect(data: &[u8]) -> CodecResult<EnvelopeHeader> {
    if data.len() < HEADER_SIZE {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE,
            actual: data.len(),
        });
    }

    let magic = [data[0], data[1], data[2], data[3]];
    if magic != MAGIC {
        return Err(CodecError::BadMagic(magic));
    }

    let version = data[4];
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let payload_len = u32::from_le_bytes([data[5], data[6], data[7], data[8]]);
    let checksum = u32::from_le_bytes([data[9], data[10], data[11], data[12]]);

    Ok(EnvelopeHeader {
        version,
        payload_len,
        checksum,
    })
}

/// Validate an envelope and return its payload.
pub fn open(data: &[u8]) -> CodecResult<&[u8]> {
    let header = inspect(data)?;

    let needed = HEADER_SIZE + header.payload_len as usize;
    if data.len() < needed {
        return Err(CodecError::Truncated {
            needed,
            actual: data.len(),
        });
    }
    if data.len() > needed {
        return Err(CodecError::TrailingBytes(data.len() - needed));
    }

    let payload = &data[HEADER_SIZE..];
    let actual = crc32fast::hash(payload);
    if actual != header.checksum {
        return Err(CodecError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn seal_then_open() {
        let sealed = seal(b"hello").unwrap();
        assert_eq!(sealed.len(), HEADER_SIZE + 5);
        assert_eq!(open(&sealed).unwrap(), b"hello");
    }

    #[test]
    fn empty_payload_is_valid() {
        let sealed = seal(b"").unwrap();
        assert_eq!(open(&sealed).unwrap(), b"");
    }

    #[test]
    fn header_fields() {
        let sealed = seal(b"abc").unwrap();
        let header = inspect(&sealed).unwrap();
        assert_eq!(header.version, VERSION);
        assert_eq!(header.payload_len, 3);
        assert_eq!(header.checksum, crc32fast::hash(b"abc"));
    }

    #[test]
    fn short_input_is_truncated() {
        let err = open(b"POB").unwrap_err();
        assert!(matches!(err, CodecError::Truncated { needed: HEADER_SIZE, actual: 3 }));
    }

    #[test]
    fn torn_write_is_truncated() {
        let sealed = seal(b"a longer payload").unwrap();
        let err = open(&sealed[..sealed.len() - 4]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut data = seal(b"xyz").unwrap().to_vec();
        data.extend_from_slice(b"!!");
        assert_eq!(open(&data).unwrap_err(), CodecError::TrailingBytes(2));
    }

    #[test]
    fn wrong_magic() {
        let mut data = seal(b"xyz").unwrap().to_vec();
        data[0] = b'X';
        assert!(matches!(open(&data).unwrap_err(), CodecError::BadMagic(_)));
    }

    #[test]
    fn future_version() {
        let mut data = seal(b"xyz").unwrap().to_vec();
        data[4] = 9;
        assert_eq!(open(&data).unwrap_err(), CodecError::UnsupportedVersion(9));
    }

    #[test]
    fn oversized_length_is_rejected() {
        assert_eq!(payload_len(u32::MAX as usize), Ok(u32::MAX));
        #[cfg(target_pointer_width = "64")]
        assert_eq!(
            payload_len(u32::MAX as usize + 1),
            Err(CodecError::PayloadTooLarge(u32::MAX as usize + 1))
        );
    }

    proptest! {
        #[test]
        fn any_flipped_payload_byte_is_detected(
            payload in proptest::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut data = seal(&payload).unwrap().to_vec();
            let at = HEADER_SIZE + index.index(payload.len());
            data[at] ^= flip;
            let is_checksum_mismatch =
                matches!(open(&data), Err(CodecError::ChecksumMismatch { .. }));
            prop_assert!(is_checksum_mismatch);
        }
    }
}

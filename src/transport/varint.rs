//! Variable-length integer and blob encoding.
//!
//! Integers use a 2-bit length prefix in the first byte:
//!
//! ```text
//! 00 -> 1 byte  (6 bits)
//! 01 -> 2 bytes (14 bits)
//! 10 -> 4 bytes (30 bits)
//! 11 -> 8 bytes (62 bits)
//! ```
//!
//! Blobs are a varint length followed by that many bytes.

use bytes::{Buf, BufMut, Bytes};

use crate::core::DecodeError;

/// Largest encodable value (2^62 - 1).
pub const VARINT_MAX: u64 = (1 << 62) - 1;

/// Number of bytes `value` occupies on the wire.
pub fn varint_len(value: u64) -> usize {
    if value < 1 << 6 {
        1
    } else if value < 1 << 14 {
        2
    } else if value < 1 << 30 {
        4
    } else {
        8
    }
}

/// Length of a varint given its first byte.
pub fn varint_len_from_first(first: u8) -> usize {
    1 << (first >> 6)
}

/// Append `value` to `buf`.
///
/// Values above [`VARINT_MAX`] are clamped.
pub fn put_varint<B: BufMut>(buf: &mut B, value: u64) {
    debug_assert!(value <= VARINT_MAX, "varint out of range: {value}");
    let value = value.min(VARINT_MAX);
    match varint_len(value) {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16(0x4000 | value as u16),
        4 => buf.put_u32(0x8000_0000 | value as u32),
        _ => buf.put_u64(0xc000_0000_0000_0000 | value),
    }
}

/// Read a varint from `buf`.
pub fn get_varint<B: Buf>(buf: &mut B) -> Result<u64, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::UnexpectedEof);
    }
    let first = buf.chunk()[0];
    let len = varint_len_from_first(first);
    if buf.remaining() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    let value = match len {
        1 => u64::from(buf.get_u8()),
        2 => u64::from(buf.get_u16() & 0x3fff),
        4 => u64::from(buf.get_u32() & 0x3fff_ffff),
        _ => buf.get_u64() & VARINT_MAX,
    };
    Ok(value)
}

/// Append a length-prefixed blob.
pub fn put_blob<B: BufMut>(buf: &mut B, data: &[u8]) {
    put_varint(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Read a length-prefixed blob.
pub fn get_blob(buf: &mut Bytes) -> Result<Bytes, DecodeError> {
    let len = get_varint(buf)?;
    let len = usize::try_from(len).map_err(|_| DecodeError::UnexpectedEof)?;
    if buf.remaining() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(buf.split_to(len))
}

/// Encoded size of a blob of `len` bytes.
pub fn blob_len(len: usize) -> usize {
    varint_len(len as u64) + len
}

/// Largest blob payload whose encoding fits in `available` bytes.
///
/// Returns `None` when not even the length prefix fits.
pub fn max_blob_payload(available: usize) -> Option<usize> {
    if available == 0 {
        return None;
    }
    let mut len = available - 1;
    while blob_len(len) > available {
        len -= 1;
    }
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_varint_boundaries() {
        let cases: &[(u64, usize)] = &[
            (0, 1),
            (63, 1),
            (64, 2),
            (16383, 2),
            (16384, 4),
            ((1 << 30) - 1, 4),
            (1 << 30, 8),
            (VARINT_MAX, 8),
        ];
        for &(value, len) in cases {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), len, "value {value}");
            assert_eq!(varint_len(value), len);
            assert_eq!(varint_len_from_first(buf[0]), len);
        }
    }

    #[test]
    fn test_varint_known_encoding() {
        let mut bytes = Bytes::from(hex::decode("7bbd").unwrap());
        assert_eq!(get_varint(&mut bytes).unwrap(), 15293);
        assert!(bytes.is_empty());

        let mut bytes = Bytes::from(hex::decode("9d7f3e7d").unwrap());
        assert_eq!(get_varint(&mut bytes).unwrap(), 494_878_333);
    }

    #[test]
    fn test_varint_truncated() {
        let mut bytes = Bytes::from_static(&[0x80, 0x01]);
        assert_eq!(get_varint(&mut bytes), Err(DecodeError::UnexpectedEof));

        let mut empty = Bytes::new();
        assert_eq!(get_varint(&mut empty), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn test_blob_truncated() {
        let mut bytes = Bytes::from_static(&[0x05, 1, 2]);
        assert_eq!(get_blob(&mut bytes), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn test_max_blob_payload() {
        assert_eq!(max_blob_payload(0), None);
        assert_eq!(max_blob_payload(1), Some(0));
        assert_eq!(max_blob_payload(64), Some(63));
        // 64 needs a two-byte prefix, so 65 bytes only fit 63.
        assert_eq!(max_blob_payload(65), Some(63));
        assert_eq!(max_blob_payload(66), Some(64));
    }

    proptest! {
        #[test]
        fn prop_varint_roundtrip(value in 0..=VARINT_MAX) {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            prop_assert_eq!(buf.len(), varint_len(value));
            let mut bytes = Bytes::from(buf);
            prop_assert_eq!(get_varint(&mut bytes).unwrap(), value);
            prop_assert!(bytes.is_empty());
        }

        #[test]
        fn prop_max_blob_payload_fits(available in 1usize..100_000) {
            let len = max_blob_payload(available).unwrap();
            prop_assert!(blob_len(len) <= available);
            prop_assert!(blob_len(len + 2) > available);
        }
    }
}

//! Crypto frame reassembly.

use bytes::{Bytes, BytesMut};

use crate::core::DecodeError;

/// Buffers Crypto frame fragments until the last one arrives.
#[derive(Debug)]
pub struct Reassembler {
    buffer: BytesMut,
    limit: usize,
}

impl Reassembler {
    /// Accept messages of up to `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            limit,
        }
    }

    /// Add a fragment. Returns the complete message on the last fragment.
    pub fn push(&mut self, data: &[u8], is_last_fragment: bool) -> Result<Option<Bytes>, DecodeError> {
        let total = self.buffer.len() + data.len();
        if total > self.limit {
            self.buffer.clear();
            return Err(DecodeError::TooLong {
                actual: total,
                limit: self.limit,
            });
        }
        self.buffer.extend_from_slice(data);
        if !is_last_fragment {
            return Ok(None);
        }
        Ok(Some(self.buffer.split().freeze()))
    }

    /// Bytes buffered for the current message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yields_only_on_last_fragment() {
        let mut reassembler = Reassembler::new(64);
        assert_eq!(reassembler.push(b"ab", false).unwrap(), None);
        assert_eq!(reassembler.push(b"cd", false).unwrap(), None);
        assert_eq!(reassembler.buffered(), 4);
        assert_eq!(
            reassembler.push(b"e", true).unwrap().as_deref(),
            Some(&b"abcde"[..])
        );
        assert_eq!(reassembler.buffered(), 0);

        assert_eq!(
            reassembler.push(b"next", true).unwrap().as_deref(),
            Some(&b"next"[..])
        );
    }

    #[test]
    fn test_limit() {
        let mut reassembler = Reassembler::new(4);
        reassembler.push(b"abc", false).unwrap();
        assert!(matches!(
            reassembler.push(b"de", true),
            Err(DecodeError::TooLong { actual: 5, limit: 4 })
        ));
    }
}

//! Per-record nonce construction.
//!
//! The 12-byte nonce is the static IV XOR the record counter, with the
//! counter in big-endian order aligned to the right:
//!
//! ```text
//! nonce = iv XOR (0x00000000 || counter_be64)
//! ```

use crate::core::{CryptoError, RECORD_IV_SIZE};

/// Build the nonce for record `counter`.
pub fn record_nonce(iv: &[u8; RECORD_IV_SIZE], counter: u64) -> [u8; RECORD_IV_SIZE] {
    let mut nonce = *iv;
    let offset = RECORD_IV_SIZE - 8;
    for (byte, c) in nonce[offset..].iter_mut().zip(counter.to_be_bytes()) {
        *byte ^= c;
    }
    nonce
}

/// Monotonic record counter for one key epoch.
#[derive(Debug, Default, Clone)]
pub struct RecordCounter {
    next: u64,
}

impl RecordCounter {
    /// Fresh counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next counter value.
    pub fn advance(&mut self) -> Result<u64, CryptoError> {
        let current = self.next;
        self.next = current.checked_add(1).ok_or(CryptoError::CounterExhaustion)?;
        Ok(current)
    }

    /// Next value [`advance`](Self::advance) would return.
    pub fn peek(&self) -> u64 {
        self.next
    }

    #[cfg(test)]
    pub(crate) fn set(&mut self, next: u64) {
        self.next = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_nonce_xor_layout() {
        let iv = [0xffu8; RECORD_IV_SIZE];
        let nonce = record_nonce(&iv, 1);
        assert_eq!(&nonce[..11], &[0xff; 11]);
        assert_eq!(nonce[11], 0xfe);

        let zero_iv = [0u8; RECORD_IV_SIZE];
        let nonce = record_nonce(&zero_iv, 0x0102);
        assert_eq!(hex::encode(nonce), "000000000000000000000102");
    }

    #[test]
    fn test_counter_strictly_increases() {
        let iv = [0x5au8; RECORD_IV_SIZE];
        let mut counter = RecordCounter::new();
        let mut last = None;
        let mut nonces = HashSet::new();
        for _ in 0..1000 {
            let value = counter.advance().unwrap();
            if let Some(last) = last {
                assert!(value > last);
            }
            last = Some(value);
            assert!(nonces.insert(record_nonce(&iv, value)));
        }
    }

    #[test]
    fn test_counter_exhaustion() {
        let mut counter = RecordCounter::new();
        counter.set(u64::MAX);
        assert!(matches!(
            counter.advance(),
            Err(CryptoError::CounterExhaustion)
        ));
    }
}

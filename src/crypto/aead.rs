//! AES-128-GCM record protection.
//!
//! Each packet body is sealed as one record. The packet's length prefix is
//! the associated data, and the nonce comes from [`record_nonce`] with a
//! counter that restarts whenever new keys are installed.

use aes_gcm::{
    Aes128Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};

use crate::core::{AEAD_TAG_SIZE, CryptoError, RECORD_IV_SIZE};

use super::nonce::{RecordCounter, record_nonce};
use super::schedule::TrafficKeys;

/// Cipher state for one direction.
pub struct RecordProtection {
    cipher: Aes128Gcm,
    iv: [u8; RECORD_IV_SIZE],
    counter: RecordCounter,
}

impl RecordProtection {
    /// Start a new key epoch.
    pub fn new(keys: &TrafficKeys) -> Result<Self, CryptoError> {
        let cipher = Aes128Gcm::new_from_slice(&keys.key)
            .map_err(|_| CryptoError::InvalidKey("record key length".into()))?;
        Ok(Self {
            cipher,
            iv: keys.iv,
            counter: RecordCounter::new(),
        })
    }

    /// Encrypt one record, returning ciphertext with the tag appended.
    pub fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = record_nonce(&self.iv, self.counter.advance()?);
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt one record.
    ///
    /// The counter advances even when authentication fails; the connection
    /// is torn down on any failure.
    pub fn open(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < AEAD_TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let nonce = record_nonce(&self.iv, self.counter.advance()?);
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    #[cfg(test)]
    pub(crate) fn next_counter(&self) -> u64 {
        self.counter.peek()
    }
}

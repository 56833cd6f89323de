//! Running handshake transcript hash.
//!
//! Every handshake message byte, sent or received, is appended as soon as it
//! is serialized or reassembled. [`TranscriptHash::finalize`] snapshots the
//! running SHA-256 at a message boundary; derivations and signatures use the
//! latest snapshot.

use sha2::{Digest, Sha256};

use crate::core::HASH_SIZE;

/// SHA-256 over the handshake so far.
#[derive(Clone)]
pub struct TranscriptHash {
    hasher: Sha256,
    digest: [u8; HASH_SIZE],
}

impl Default for TranscriptHash {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptHash {
    /// Empty transcript. The digest is all zeros until first finalized.
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            digest: [0u8; HASH_SIZE],
        }
    }

    /// Append handshake bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Snapshot the hash of everything appended so far.
    pub fn finalize(&mut self) -> [u8; HASH_SIZE] {
        self.digest = self.hasher.clone().finalize().into();
        self.digest
    }

    /// The latest snapshot.
    pub fn digest(&self) -> [u8; HASH_SIZE] {
        self.digest
    }
}

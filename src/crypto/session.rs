//! Connection security state.
//!
//! The [`SecurityManager`] owns the handshake transcript, the root secret and
//! the per-direction record protection. It seals outbound packet bodies and
//! opens inbound ones; until a direction has keys installed its packets pass
//! through in plaintext.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::core::{AEAD_TAG_SIZE, CryptoError, HASH_SIZE, Role};
use crate::transport::{PacketReader, PacketWriter, encode_packet_prefix};

use super::aead::RecordProtection;
use super::schedule::{Phase, PhaseKeys, Secret, TrafficKeys, derive_phase_keys, derive_root_secret};
use super::transcript::TranscriptHash;

struct SecurityState {
    transcript: TranscriptHash,
    root: Option<Secret>,
    encrypt: Option<RecordProtection>,
    decrypt: Option<RecordProtection>,
}

/// Key schedule, transcript and record protection for one connection.
pub struct SecurityManager {
    role: Role,
    state: Mutex<SecurityState>,
}

impl SecurityManager {
    /// Fresh state with no keys.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: Mutex::new(SecurityState {
                transcript: TranscriptHash::new(),
                root: None,
                encrypt: None,
                decrypt: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SecurityState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// This side's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Append handshake message bytes to the transcript.
    pub fn update_transcript(&self, bytes: &[u8]) {
        self.lock().transcript.update(bytes);
    }

    /// Snapshot the transcript hash at a message boundary.
    pub fn finalize_transcript(&self) -> [u8; HASH_SIZE] {
        self.lock().transcript.finalize()
    }

    /// The latest transcript snapshot.
    pub fn transcript_hash(&self) -> [u8; HASH_SIZE] {
        self.lock().transcript.digest()
    }

    /// Derive the root secret from the key exchange output and the current
    /// transcript snapshot.
    pub fn complete_key_exchange(&self, shared_secret: &[u8]) -> Result<(), CryptoError> {
        let mut state = self.lock();
        let root = derive_root_secret(shared_secret, &state.transcript.digest())?;
        state.root = Some(root);
        Ok(())
    }

    /// Derive both directions' keys for `phase` from the root secret and the
    /// current transcript snapshot.
    pub fn derive_keys(&self, phase: Phase) -> Result<PhaseKeys, CryptoError> {
        let state = self.lock();
        let root = state.root.as_ref().ok_or(CryptoError::MissingSecret("root"))?;
        derive_phase_keys(root, phase, &state.transcript.digest())
    }

    /// Start sealing outbound packets with `keys`. Resets the send counter.
    pub fn install_encryption(&self, keys: &TrafficKeys) -> Result<(), CryptoError> {
        let protection = RecordProtection::new(keys)?;
        self.lock().encrypt = Some(protection);
        debug!(role = ?self.role, "encryption key installed");
        Ok(())
    }

    /// Start opening inbound packets with `keys`. Resets the receive counter.
    pub fn install_decryption(&self, keys: &TrafficKeys) -> Result<(), CryptoError> {
        let protection = RecordProtection::new(keys)?;
        self.lock().decrypt = Some(protection);
        debug!(role = ?self.role, "decryption key installed");
        Ok(())
    }

    /// Install both directions of `keys` for this role.
    pub fn install_keys(&self, keys: &PhaseKeys) -> Result<(), CryptoError> {
        self.install_encryption(keys.encrypt_keys(self.role))?;
        self.install_decryption(keys.decrypt_keys(self.role))
    }

    /// Skip the handshake: derive session keys from a secret both peers
    /// already share, with an all-zero transcript hash.
    pub fn install_pre_shared_secret(&self, secret: &[u8]) -> Result<(), CryptoError> {
        let zero = [0u8; HASH_SIZE];
        let root = derive_root_secret(secret, &zero)?;
        let keys = derive_phase_keys(&root, Phase::Session, &zero)?;
        self.lock().root = Some(root);
        self.install_keys(&keys)
    }

    /// Whether outbound packets are sealed.
    pub fn is_encrypting(&self) -> bool {
        self.lock().encrypt.is_some()
    }

    /// Whether inbound packets are opened.
    pub fn is_decrypting(&self) -> bool {
        self.lock().decrypt.is_some()
    }

    /// Bytes sealing adds to a body once keys are installed.
    pub fn record_overhead(&self) -> usize {
        AEAD_TAG_SIZE
    }

    /// Build a complete packet: length prefix followed by the (sealed) body.
    ///
    /// The prefix is the record's associated data, so it is computed from
    /// the sealed length before encryption.
    pub fn seal_packet(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut state = self.lock();
        let Some(protection) = state.encrypt.as_mut() else {
            let mut packet = encode_packet_prefix(plaintext.len());
            packet.extend_from_slice(plaintext);
            return Ok(packet);
        };
        let mut packet = encode_packet_prefix(plaintext.len() + AEAD_TAG_SIZE);
        let sealed = protection.seal(&packet, plaintext)?;
        packet.extend_from_slice(&sealed);
        Ok(packet)
    }

    /// Open a packet body read from the wire. `prefix` is the packet's raw
    /// length prefix.
    pub fn open_packet(&self, prefix: &[u8], body: Vec<u8>) -> Result<Vec<u8>, CryptoError> {
        let mut state = self.lock();
        match state.decrypt.as_mut() {
            Some(protection) => protection.open(prefix, &body),
            None => Ok(body),
        }
    }

    /// Wrap the socket's write half so every packet is sealed as keys allow.
    pub fn create_encrypted_stream<W>(self: &Arc<Self>, sink: W) -> PacketWriter<W>
    where
        W: AsyncWrite + Unpin,
    {
        PacketWriter::new(sink, Arc::clone(self))
    }

    /// Wrap the socket's read half so every packet is opened as keys allow.
    pub fn create_decrypted_stream<R>(self: &Arc<Self>, source: R) -> PacketReader<R>
    where
        R: AsyncRead + Unpin,
    {
        PacketReader::new(source, Arc::clone(self))
    }
}

impl std::fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SecurityManager")
            .field("role", &self.role)
            .field("has_root", &state.root.is_some())
            .field("encrypting", &state.encrypt.is_some())
            .field("decrypting", &state.decrypt.is_some())
            .finish()
    }
}

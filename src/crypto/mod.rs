//! QLIC security layer.
//!
//! - **Key schedule**: HKDF-SHA256 from the X25519 exchange and the handshake
//!   transcript, see [`schedule`]
//! - **Record protection**: AES-128-GCM with counter-derived nonces
//! - **Authentication**: pluggable [`Authenticator`] / [`PeerValidator`]
//! - **Security manager**: [`SecurityManager`] tying the above to packets

mod aead;
pub mod auth;
mod keys;
mod nonce;
pub mod schedule;
mod session;
mod transcript;

pub use aead::RecordProtection;
pub use auth::{
    AuthAlgorithm, AuthConfig, Authenticator, Certificate, CertificateChainAuthenticator,
    CertificateChainValidator, PeerIdentity, PeerValidator, PinnedIdentityAuthenticator,
    PinnedIdentityValidator, Unauthenticated,
};
pub use keys::{
    EphemeralKeyExchange, IdentityKeypair, hello_nonce, verify_signature, verifying_key_from_slice,
};
pub use nonce::{RecordCounter, record_nonce};
pub use schedule::{Phase, PhaseKeys, Secret, TrafficKeys};
pub use session::SecurityManager;
pub use transcript::TranscriptHash;

pub use ed25519_dalek::VerifyingKey;

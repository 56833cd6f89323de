//! Identity and ephemeral key management.
//!
//! Long-term identities are Ed25519 signing keys. Each handshake uses a fresh
//! X25519 ephemeral key pair for forward secrecy.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{RngCore, rngs::OsRng};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::core::{CryptoError, HELLO_NONCE_SIZE, PUBLIC_KEY_SIZE};

/// A long-term Ed25519 identity.
///
/// The signing key is zeroized on drop by `ed25519-dalek`.
#[derive(Clone)]
pub struct IdentityKeypair {
    signing: SigningKey,
}

impl IdentityKeypair {
    /// Generate a new random identity.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore an identity from its 32-byte secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    /// The public half.
    pub fn public_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Sign `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

impl std::fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeypair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Parse a 32-byte Ed25519 public key.
pub fn verifying_key_from_slice(bytes: &[u8]) -> Result<VerifyingKey, CryptoError> {
    let bytes: &[u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("public key is {} bytes", bytes.len())))?;
    VerifyingKey::from_bytes(bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Verify an Ed25519 signature given as raw bytes.
pub fn verify_signature(
    key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let signature = Signature::from_slice(signature)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    key.verify(message, &signature)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// One side of an X25519 ephemeral exchange.
pub struct EphemeralKeyExchange {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyExchange {
    /// Generate a fresh ephemeral key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The share sent to the peer.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Consume the secret and derive the shared secret with the peer's share.
    pub fn complete(self, peer_share: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let peer: [u8; PUBLIC_KEY_SIZE] = peer_share.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("key share is {} bytes", peer_share.len()))
        })?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey("non-contributory key share".into()));
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

/// Random nonce for hello messages.
pub fn hello_nonce() -> [u8; HELLO_NONCE_SIZE] {
    let mut nonce = [0u8; HELLO_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_sign_verify() {
        let identity = IdentityKeypair::generate();
        let signature = identity.sign(b"transcript");
        let key = identity.public_key();

        verify_signature(&key, b"transcript", &signature.to_bytes()).unwrap();
        assert!(verify_signature(&key, b"other", &signature.to_bytes()).is_err());
        assert!(verify_signature(&key, b"transcript", &[0u8; 10]).is_err());
    }

    #[test]
    fn test_identity_from_secret_is_stable() {
        let a = IdentityKeypair::from_secret_bytes(&[7u8; 32]);
        let b = IdentityKeypair::from_secret_bytes(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());

        let parsed = verifying_key_from_slice(a.public_key().as_bytes()).unwrap();
        assert_eq!(parsed, a.public_key());
        assert!(verifying_key_from_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_ephemeral_exchange_agrees() {
        let client = EphemeralKeyExchange::generate();
        let server = EphemeralKeyExchange::generate();
        let client_share = client.public_bytes();
        let server_share = server.public_bytes();

        let a = client.complete(&server_share).unwrap();
        let b = server.complete(&client_share).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_ephemeral_rejects_bad_share() {
        let exchange = EphemeralKeyExchange::generate();
        assert!(exchange.complete(&[0u8; 31]).is_err());

        let exchange = EphemeralKeyExchange::generate();
        // The all-zero point yields a non-contributory result.
        assert!(exchange.complete(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_hello_nonces_differ() {
        assert_ne!(hello_nonce(), hello_nonce());
    }
}

//! Key schedule.
//!
//! ```text
//! prk          = HKDF-Extract(salt = 0^32, shared_secret)
//! root         = HKDF-Expand(prk, "derived", transcript_hash)
//! phase        = HKDF-Expand(HKDF-Extract(salt = transcript_hash, root),
//!                            "hs traffic" | "ap traffic")
//! client / server traffic = HKDF-Expand(phase, "c traffic" | "s traffic")
//! key (16) / iv (12)      = HKDF-Expand(traffic, "key" | "iv")
//! ```
//!
//! Every label is prefixed with `"qlic "`.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{
    CryptoError, HASH_SIZE, LABEL_CLIENT_TRAFFIC, LABEL_DERIVED, LABEL_HANDSHAKE_PHASE, LABEL_IV,
    LABEL_KEY, LABEL_PREFIX, LABEL_SERVER_TRAFFIC, LABEL_SESSION_PHASE, RECORD_IV_SIZE,
    RECORD_KEY_SIZE, Role,
};

/// A 32-byte secret, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; HASH_SIZE]);

impl Secret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// The raw bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Key schedule phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Protects the authentication messages.
    Handshake,
    /// Protects application traffic.
    Session,
}

impl Phase {
    fn label(self) -> &'static [u8] {
        match self {
            Phase::Handshake => LABEL_HANDSHAKE_PHASE,
            Phase::Session => LABEL_SESSION_PHASE,
        }
    }
}

/// Key and IV protecting one direction.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TrafficKeys {
    /// AES-128 key.
    pub key: [u8; RECORD_KEY_SIZE],
    /// Static IV.
    pub iv: [u8; RECORD_IV_SIZE],
}

impl std::fmt::Debug for TrafficKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TrafficKeys(..)")
    }
}

/// Both directions' keys for one phase.
#[derive(Clone, Debug)]
pub struct PhaseKeys {
    /// Client-to-server keys.
    pub client: TrafficKeys,
    /// Server-to-client keys.
    pub server: TrafficKeys,
}

impl PhaseKeys {
    /// Keys this role encrypts with.
    pub fn encrypt_keys(&self, role: Role) -> &TrafficKeys {
        match role {
            Role::Client => &self.client,
            Role::Server => &self.server,
        }
    }

    /// Keys this role decrypts with.
    pub fn decrypt_keys(&self, role: Role) -> &TrafficKeys {
        self.encrypt_keys(role.peer())
    }
}

fn expand<const N: usize>(
    hk: &Hkdf<Sha256>,
    label: &[u8],
    context: &[u8],
) -> Result<[u8; N], CryptoError> {
    let mut okm = [0u8; N];
    hk.expand_multi_info(&[LABEL_PREFIX, label, context], &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(okm)
}

fn from_secret(secret: &Secret) -> Result<Hkdf<Sha256>, CryptoError> {
    Hkdf::<Sha256>::from_prk(secret.as_bytes()).map_err(|_| CryptoError::KeyDerivationFailed)
}

/// Derive the root secret from the key exchange output.
pub fn derive_root_secret(
    shared_secret: &[u8],
    transcript_hash: &[u8; HASH_SIZE],
) -> Result<Secret, CryptoError> {
    let (_, hk) = Hkdf::<Sha256>::extract(Some(&[0u8; HASH_SIZE][..]), shared_secret);
    expand(&hk, LABEL_DERIVED, transcript_hash).map(Secret)
}

/// Derive a phase secret, salted with the current transcript hash.
pub fn derive_phase_secret(
    root: &Secret,
    phase: Phase,
    transcript_hash: &[u8; HASH_SIZE],
) -> Result<Secret, CryptoError> {
    let (_, hk) = Hkdf::<Sha256>::extract(Some(&transcript_hash[..]), root.as_bytes());
    expand(&hk, phase.label(), &[]).map(Secret)
}

/// Split a phase secret into client and server traffic secrets.
pub fn derive_traffic_secrets(phase_secret: &Secret) -> Result<(Secret, Secret), CryptoError> {
    let hk = from_secret(phase_secret)?;
    let client = Secret(expand(&hk, LABEL_CLIENT_TRAFFIC, &[])?);
    let server = Secret(expand(&hk, LABEL_SERVER_TRAFFIC, &[])?);
    Ok((client, server))
}

/// Derive a record key and IV from a traffic secret.
pub fn derive_traffic_keys(traffic_secret: &Secret) -> Result<TrafficKeys, CryptoError> {
    let hk = from_secret(traffic_secret)?;
    Ok(TrafficKeys {
        key: expand(&hk, LABEL_KEY, &[])?,
        iv: expand(&hk, LABEL_IV, &[])?,
    })
}

/// Run the whole fan-out for one phase.
pub fn derive_phase_keys(
    root: &Secret,
    phase: Phase,
    transcript_hash: &[u8; HASH_SIZE],
) -> Result<PhaseKeys, CryptoError> {
    let phase_secret = derive_phase_secret(root, phase, transcript_hash)?;
    let (client, server) = derive_traffic_secrets(&phase_secret)?;
    Ok(PhaseKeys {
        client: derive_traffic_keys(&client)?,
        server: derive_traffic_keys(&server)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peers_derive_matching_keys() {
        let shared = [0x42u8; 32];
        let transcript = [0x11u8; HASH_SIZE];

        // Each peer runs the schedule independently.
        let client_root = derive_root_secret(&shared, &transcript).unwrap();
        let server_root = derive_root_secret(&shared, &transcript).unwrap();
        let client = derive_phase_keys(&client_root, Phase::Handshake, &transcript).unwrap();
        let server = derive_phase_keys(&server_root, Phase::Handshake, &transcript).unwrap();

        assert_eq!(
            client.encrypt_keys(Role::Client),
            server.decrypt_keys(Role::Server)
        );
        assert_eq!(
            server.encrypt_keys(Role::Server),
            client.decrypt_keys(Role::Client)
        );
        assert_ne!(client.client.key, client.server.key);
        assert_ne!(client.client.iv, client.server.iv);
    }

    #[test]
    fn test_phases_differ() {
        let root = derive_root_secret(&[1u8; 32], &[0u8; HASH_SIZE]).unwrap();
        let transcript = [9u8; HASH_SIZE];
        let handshake = derive_phase_keys(&root, Phase::Handshake, &transcript).unwrap();
        let session = derive_phase_keys(&root, Phase::Session, &transcript).unwrap();
        assert_ne!(handshake.client, session.client);
    }

    #[test]
    fn test_transcript_binds_keys() {
        let root = derive_root_secret(&[1u8; 32], &[0u8; HASH_SIZE]).unwrap();
        let a = derive_phase_keys(&root, Phase::Session, &[1u8; HASH_SIZE]).unwrap();
        let b = derive_phase_keys(&root, Phase::Session, &[2u8; HASH_SIZE]).unwrap();
        assert_ne!(a.client, b.client);

        let other_root = derive_root_secret(&[1u8; 32], &[3u8; HASH_SIZE]).unwrap();
        assert_ne!(root.as_bytes(), other_root.as_bytes());
    }
}

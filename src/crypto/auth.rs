//! Peer authentication.
//!
//! Each side proves its identity with an [`Authenticator`] and checks the
//! peer's proof with a [`PeerValidator`]. A proof has two parts: a share
//! (identity material such as a public key or certificate chain, bound to the
//! transcript hash at the point it is created) and a signature over the
//! transcript hash after the share, built by [`verify_message`].

use std::fmt;
use std::sync::Arc;

use ed25519_dalek::{Signature, VerifyingKey};

use crate::core::{CERTIFICATE_CONTEXT, HASH_SIZE, PUBLIC_KEY_SIZE, QlicError, SIGNATURE_SIZE};

use super::keys::{IdentityKeypair, verify_signature, verifying_key_from_slice};

/// Authentication algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthAlgorithm {
    /// An Ed25519 key pinned by the peer in advance.
    PinnedIdentity,
    /// An Ed25519 leaf key certified by a trusted root.
    CertificateChain,
    /// A platform attestation backend bound to the transcript.
    PlatformAttestation,
    /// No authentication. Used for unilateral authentication.
    Unauthenticated,
    /// Identifier this build does not know.
    Unknown(u8),
}

impl AuthAlgorithm {
    /// Wire identifier.
    pub fn id(self) -> u8 {
        match self {
            Self::PinnedIdentity => 0x01,
            Self::CertificateChain => 0x02,
            Self::PlatformAttestation => 0x03,
            Self::Unauthenticated => 0x04,
            Self::Unknown(id) => id,
        }
    }

    /// Parse a wire identifier.
    pub fn from_id(id: u8) -> Self {
        match id {
            0x01 => Self::PinnedIdentity,
            0x02 => Self::CertificateChain,
            0x03 => Self::PlatformAttestation,
            0x04 => Self::Unauthenticated,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for AuthAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PinnedIdentity => f.write_str("pinned-identity"),
            Self::CertificateChain => f.write_str("certificate-chain"),
            Self::PlatformAttestation => f.write_str("platform-attestation"),
            Self::Unauthenticated => f.write_str("unauthenticated"),
            Self::Unknown(id) => write!(f, "unknown({id:#04x})"),
        }
    }
}

/// Build the message signed in AuthVerify.
///
/// ```text
/// 0x20 * 64 || context || 0x00 || transcript_hash
/// ```
pub fn verify_message(context: &[u8], transcript_hash: &[u8; HASH_SIZE]) -> Vec<u8> {
    let mut message = Vec::with_capacity(64 + context.len() + 1 + HASH_SIZE);
    message.extend_from_slice(&[0x20; 64]);
    message.extend_from_slice(context);
    message.push(0x00);
    message.extend_from_slice(transcript_hash);
    message
}

/// Local half of an authentication algorithm.
pub trait Authenticator: Send + Sync {
    /// Algorithm this authenticator implements.
    fn algorithm(&self) -> AuthAlgorithm;

    /// Produce the AuthShare payload. `binding` is the transcript hash
    /// before the share.
    fn create_share(&self, binding: &[u8; HASH_SIZE]) -> Result<Vec<u8>, QlicError>;

    /// Sign an AuthVerify message.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, QlicError>;
}

/// Peer half of an authentication algorithm.
pub trait PeerValidator: Send + Sync {
    /// Algorithm this validator accepts.
    fn algorithm(&self) -> AuthAlgorithm;

    /// Validate the peer's AuthShare and return the identity that must sign
    /// its AuthVerify.
    fn validate(&self, share: &[u8], binding: &[u8; HASH_SIZE])
    -> Result<PeerIdentity, QlicError>;
}

/// Identity established from a peer's AuthShare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    /// The peer did not authenticate.
    Anonymous,
    /// The peer holds this Ed25519 key.
    Key(VerifyingKey),
}

impl PeerIdentity {
    /// Check the peer's AuthVerify signature.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), QlicError> {
        match self {
            Self::Anonymous if signature.is_empty() => Ok(()),
            Self::Anonymous => Err(QlicError::Authorization(
                "unexpected signature from anonymous peer".into(),
            )),
            Self::Key(key) => verify_signature(key, message, signature)
                .map_err(|e| QlicError::Authorization(format!("bad AuthVerify: {e}"))),
        }
    }
}

// -----------------------------------------------------------------------------
// Pinned identity
// -----------------------------------------------------------------------------

/// Proves possession of an Ed25519 identity the peer has pinned.
#[derive(Debug, Clone)]
pub struct PinnedIdentityAuthenticator {
    identity: IdentityKeypair,
}

impl PinnedIdentityAuthenticator {
    /// Authenticate as `identity`.
    pub fn new(identity: IdentityKeypair) -> Self {
        Self { identity }
    }
}

impl Authenticator for PinnedIdentityAuthenticator {
    fn algorithm(&self) -> AuthAlgorithm {
        AuthAlgorithm::PinnedIdentity
    }

    fn create_share(&self, _binding: &[u8; HASH_SIZE]) -> Result<Vec<u8>, QlicError> {
        Ok(self.identity.public_key().to_bytes().to_vec())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, QlicError> {
        Ok(self.identity.sign(message).to_bytes().to_vec())
    }
}

/// Accepts peers whose key is in a fixed list.
#[derive(Debug, Clone)]
pub struct PinnedIdentityValidator {
    pinned: Vec<VerifyingKey>,
}

impl PinnedIdentityValidator {
    /// Accept any of `pinned`.
    pub fn new(pinned: Vec<VerifyingKey>) -> Self {
        Self { pinned }
    }
}

impl PeerValidator for PinnedIdentityValidator {
    fn algorithm(&self) -> AuthAlgorithm {
        AuthAlgorithm::PinnedIdentity
    }

    fn validate(
        &self,
        share: &[u8],
        _binding: &[u8; HASH_SIZE],
    ) -> Result<PeerIdentity, QlicError> {
        let key = verifying_key_from_slice(share)
            .map_err(|e| QlicError::Authorization(format!("bad pinned share: {e}")))?;
        if !self.pinned.contains(&key) {
            return Err(QlicError::Authorization("peer identity is not pinned".into()));
        }
        Ok(PeerIdentity::Key(key))
    }
}

// -----------------------------------------------------------------------------
// Certificate chain
// -----------------------------------------------------------------------------

/// A minimal certificate: an issuer's signature over a subject key.
///
/// Wire form is the 32-byte subject key followed by the 64-byte signature
/// over `CERTIFICATE_CONTEXT || subject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    subject: VerifyingKey,
    signature: Signature,
}

impl Certificate {
    /// Encoded size.
    pub const SIZE: usize = PUBLIC_KEY_SIZE + SIGNATURE_SIZE;

    /// Certify `subject` with `issuer`.
    pub fn issue(issuer: &IdentityKeypair, subject: &VerifyingKey) -> Self {
        let signature = issuer.sign(&Self::signed_bytes(subject));
        Self {
            subject: *subject,
            signature,
        }
    }

    /// The certified key.
    pub fn subject(&self) -> &VerifyingKey {
        &self.subject
    }

    /// Check this certificate was issued by `issuer`.
    pub fn verify(&self, issuer: &VerifyingKey) -> Result<(), QlicError> {
        verify_signature(
            issuer,
            &Self::signed_bytes(&self.subject),
            &self.signature.to_bytes(),
        )
        .map_err(|e| QlicError::Authorization(format!("bad certificate: {e}")))
    }

    /// Serialize to wire form.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..PUBLIC_KEY_SIZE].copy_from_slice(self.subject.as_bytes());
        out[PUBLIC_KEY_SIZE..].copy_from_slice(&self.signature.to_bytes());
        out
    }

    /// Parse from wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QlicError> {
        if bytes.len() != Self::SIZE {
            return Err(QlicError::Authorization(format!(
                "certificate is {} bytes",
                bytes.len()
            )));
        }
        let subject = verifying_key_from_slice(&bytes[..PUBLIC_KEY_SIZE])
            .map_err(|e| QlicError::Authorization(format!("bad certificate subject: {e}")))?;
        let signature = Signature::from_slice(&bytes[PUBLIC_KEY_SIZE..])
            .map_err(|e| QlicError::Authorization(format!("bad certificate signature: {e}")))?;
        Ok(Self { subject, signature })
    }

    fn signed_bytes(subject: &VerifyingKey) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CERTIFICATE_CONTEXT.len() + PUBLIC_KEY_SIZE);
        bytes.extend_from_slice(CERTIFICATE_CONTEXT);
        bytes.extend_from_slice(subject.as_bytes());
        bytes
    }
}

/// Presents a certificate chain, leaf first.
#[derive(Debug, Clone)]
pub struct CertificateChainAuthenticator {
    identity: IdentityKeypair,
    chain: Vec<Certificate>,
}

impl CertificateChainAuthenticator {
    /// `chain[0]` must certify `identity`'s public key.
    pub fn new(identity: IdentityKeypair, chain: Vec<Certificate>) -> Result<Self, QlicError> {
        match chain.first() {
            Some(leaf) if *leaf.subject() == identity.public_key() => {
                Ok(Self { identity, chain })
            }
            Some(_) => Err(QlicError::Config(
                "leaf certificate does not match identity".into(),
            )),
            None => Err(QlicError::Config("empty certificate chain".into())),
        }
    }
}

impl Authenticator for CertificateChainAuthenticator {
    fn algorithm(&self) -> AuthAlgorithm {
        AuthAlgorithm::CertificateChain
    }

    fn create_share(&self, _binding: &[u8; HASH_SIZE]) -> Result<Vec<u8>, QlicError> {
        Ok(self.chain.iter().flat_map(|c| c.to_bytes()).collect())
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, QlicError> {
        Ok(self.identity.sign(message).to_bytes().to_vec())
    }
}

/// Accepts chains that end at one of the trusted roots.
#[derive(Debug, Clone)]
pub struct CertificateChainValidator {
    roots: Vec<VerifyingKey>,
}

impl CertificateChainValidator {
    /// Trust chains issued by any of `roots`.
    pub fn new(roots: Vec<VerifyingKey>) -> Self {
        Self { roots }
    }
}

impl PeerValidator for CertificateChainValidator {
    fn algorithm(&self) -> AuthAlgorithm {
        AuthAlgorithm::CertificateChain
    }

    fn validate(
        &self,
        share: &[u8],
        _binding: &[u8; HASH_SIZE],
    ) -> Result<PeerIdentity, QlicError> {
        if share.is_empty() || share.len() % Certificate::SIZE != 0 {
            return Err(QlicError::Authorization(format!(
                "certificate chain is {} bytes",
                share.len()
            )));
        }
        let chain = share
            .chunks(Certificate::SIZE)
            .map(Certificate::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;

        for pair in chain.windows(2) {
            pair[0].verify(pair[1].subject())?;
        }
        let top = &chain[chain.len() - 1];
        if !self.roots.iter().any(|root| top.verify(root).is_ok()) {
            return Err(QlicError::Authorization(
                "certificate chain does not end at a trusted root".into(),
            ));
        }
        Ok(PeerIdentity::Key(*chain[0].subject()))
    }
}

// -----------------------------------------------------------------------------
// Unauthenticated
// -----------------------------------------------------------------------------

/// Sends an empty share and signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unauthenticated;

impl Authenticator for Unauthenticated {
    fn algorithm(&self) -> AuthAlgorithm {
        AuthAlgorithm::Unauthenticated
    }

    fn create_share(&self, _binding: &[u8; HASH_SIZE]) -> Result<Vec<u8>, QlicError> {
        Ok(Vec::new())
    }

    fn sign(&self, _message: &[u8]) -> Result<Vec<u8>, QlicError> {
        Ok(Vec::new())
    }
}

impl PeerValidator for Unauthenticated {
    fn algorithm(&self) -> AuthAlgorithm {
        AuthAlgorithm::Unauthenticated
    }

    fn validate(
        &self,
        share: &[u8],
        _binding: &[u8; HASH_SIZE],
    ) -> Result<PeerIdentity, QlicError> {
        if !share.is_empty() {
            return Err(QlicError::Authorization(
                "unexpected share for unauthenticated peer".into(),
            ));
        }
        Ok(PeerIdentity::Anonymous)
    }
}

// -----------------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------------

/// The algorithms one side offers and accepts.
///
/// Order matters: it is the preference order sent in ClientHello.
#[derive(Clone, Default)]
pub struct AuthConfig {
    authenticators: Vec<Arc<dyn Authenticator>>,
    validators: Vec<Arc<dyn PeerValidator>>,
}

impl AuthConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Authenticate with a pinned identity and accept the given pinned peers.
    pub fn pinned(identity: IdentityKeypair, peers: Vec<VerifyingKey>) -> Self {
        Self::new()
            .with_authenticator(Arc::new(PinnedIdentityAuthenticator::new(identity)))
            .with_validator(Arc::new(PinnedIdentityValidator::new(peers)))
    }

    /// Offer an authenticator.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    /// Accept peers through a validator.
    pub fn with_validator(mut self, validator: Arc<dyn PeerValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Algorithms this side can authenticate with.
    pub fn supported_local(&self) -> Vec<AuthAlgorithm> {
        self.authenticators.iter().map(|a| a.algorithm()).collect()
    }

    /// Algorithms this side accepts from the peer.
    pub fn accepted_remote(&self) -> Vec<AuthAlgorithm> {
        self.validators.iter().map(|v| v.algorithm()).collect()
    }

    /// Authenticator for `algorithm`.
    pub fn authenticator(&self, algorithm: AuthAlgorithm) -> Option<Arc<dyn Authenticator>> {
        self.authenticators
            .iter()
            .find(|a| a.algorithm() == algorithm)
            .cloned()
    }

    /// Validator for `algorithm`.
    pub fn validator(&self, algorithm: AuthAlgorithm) -> Option<Arc<dyn PeerValidator>> {
        self.validators
            .iter()
            .find(|v| v.algorithm() == algorithm)
            .cloned()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("supported_local", &self.supported_local())
            .field("accepted_remote", &self.accepted_remote())
            .finish()
    }
}

/// Pick an algorithm from the peer's `offered` list that `acceptable`
/// contains.
///
/// Returns the 1-based index into `offered`, or 0 when nothing matches.
/// A pinned identity wins when both sides have it; otherwise the peer's
/// order decides.
pub fn select_algorithm(offered: &[AuthAlgorithm], acceptable: &[AuthAlgorithm]) -> u64 {
    let usable = |algorithm: &AuthAlgorithm| {
        !matches!(algorithm, AuthAlgorithm::Unknown(_)) && acceptable.contains(algorithm)
    };
    let pinned = offered
        .iter()
        .position(|a| *a == AuthAlgorithm::PinnedIdentity && usable(a));
    pinned
        .or_else(|| offered.iter().position(usable))
        .map_or(0, |index| index as u64 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINDING: [u8; HASH_SIZE] = [7u8; HASH_SIZE];

    #[test]
    fn test_algorithm_ids() {
        for algorithm in [
            AuthAlgorithm::PinnedIdentity,
            AuthAlgorithm::CertificateChain,
            AuthAlgorithm::PlatformAttestation,
            AuthAlgorithm::Unauthenticated,
        ] {
            assert_eq!(AuthAlgorithm::from_id(algorithm.id()), algorithm);
        }
        assert_eq!(AuthAlgorithm::from_id(0x7f), AuthAlgorithm::Unknown(0x7f));
    }

    #[test]
    fn test_verify_message_layout() {
        let message = verify_message(b"ctx", &BINDING);
        assert_eq!(&message[..64], &[0x20; 64]);
        assert_eq!(&message[64..67], b"ctx");
        assert_eq!(message[67], 0);
        assert_eq!(&message[68..], &BINDING);
    }

    #[test]
    fn test_pinned_identity() {
        let identity = IdentityKeypair::generate();
        let authenticator = PinnedIdentityAuthenticator::new(identity.clone());
        let validator = PinnedIdentityValidator::new(vec![identity.public_key()]);

        let share = authenticator.create_share(&BINDING).unwrap();
        let peer = validator.validate(&share, &BINDING).unwrap();
        let message = verify_message(b"ctx", &BINDING);
        let signature = authenticator.sign(&message).unwrap();
        peer.verify(&message, &signature).unwrap();
        assert!(peer.verify(b"other", &signature).is_err());

        let stranger = PinnedIdentityValidator::new(vec![IdentityKeypair::generate().public_key()]);
        assert!(matches!(
            stranger.validate(&share, &BINDING),
            Err(QlicError::Authorization(_))
        ));
    }

    #[test]
    fn test_certificate_chain() {
        let root = IdentityKeypair::generate();
        let intermediate = IdentityKeypair::generate();
        let leaf = IdentityKeypair::generate();
        let chain = vec![
            Certificate::issue(&intermediate, &leaf.public_key()),
            Certificate::issue(&root, &intermediate.public_key()),
        ];
        let authenticator = CertificateChainAuthenticator::new(leaf.clone(), chain).unwrap();
        let share = authenticator.create_share(&BINDING).unwrap();
        assert_eq!(share.len(), 2 * Certificate::SIZE);

        let validator = CertificateChainValidator::new(vec![root.public_key()]);
        assert_eq!(
            validator.validate(&share, &BINDING).unwrap(),
            PeerIdentity::Key(leaf.public_key())
        );

        let untrusted = CertificateChainValidator::new(vec![leaf.public_key()]);
        assert!(untrusted.validate(&share, &BINDING).is_err());
        assert!(validator.validate(&share[..50], &BINDING).is_err());
    }

    #[test]
    fn test_certificate_chain_rejects_broken_link() {
        let root = IdentityKeypair::generate();
        let leaf = IdentityKeypair::generate();
        let other = IdentityKeypair::generate();
        // The leaf certificate claims an issuer that is not the next subject.
        let mut share = Certificate::issue(&other, &leaf.public_key()).to_bytes().to_vec();
        share.extend_from_slice(&Certificate::issue(&root, &root.public_key()).to_bytes());

        let validator = CertificateChainValidator::new(vec![root.public_key()]);
        assert!(validator.validate(&share, &BINDING).is_err());
    }

    #[test]
    fn test_certificate_authenticator_checks_leaf() {
        let root = IdentityKeypair::generate();
        let leaf = IdentityKeypair::generate();
        let wrong = vec![Certificate::issue(&root, &root.public_key())];
        assert!(CertificateChainAuthenticator::new(leaf.clone(), wrong).is_err());
        assert!(CertificateChainAuthenticator::new(leaf, Vec::new()).is_err());
    }

    #[test]
    fn test_unauthenticated() {
        let share = Unauthenticated.create_share(&BINDING).unwrap();
        assert!(share.is_empty());
        let peer = Unauthenticated.validate(&share, &BINDING).unwrap();
        assert_eq!(peer, PeerIdentity::Anonymous);
        peer.verify(b"anything", &[]).unwrap();
        assert!(peer.verify(b"anything", &[1]).is_err());
        assert!(Unauthenticated.validate(&[1], &BINDING).is_err());
    }

    #[test]
    fn test_select_algorithm() {
        use AuthAlgorithm::*;
        assert_eq!(
            select_algorithm(&[CertificateChain, PinnedIdentity], &[CertificateChain, PinnedIdentity]),
            2
        );
        assert_eq!(
            select_algorithm(&[Unauthenticated, CertificateChain], &[CertificateChain, Unauthenticated]),
            1
        );
        assert_eq!(select_algorithm(&[PinnedIdentity], &[CertificateChain]), 0);
        assert_eq!(select_algorithm(&[Unknown(9)], &[Unknown(9)]), 0);
        assert_eq!(select_algorithm(&[], &[PinnedIdentity]), 0);
    }

    #[test]
    fn test_auth_config_lookup() {
        let identity = IdentityKeypair::generate();
        let config = AuthConfig::pinned(identity.clone(), vec![identity.public_key()])
            .with_validator(Arc::new(Unauthenticated));
        assert_eq!(config.supported_local(), vec![AuthAlgorithm::PinnedIdentity]);
        assert_eq!(
            config.accepted_remote(),
            vec![AuthAlgorithm::PinnedIdentity, AuthAlgorithm::Unauthenticated]
        );
        assert!(config.authenticator(AuthAlgorithm::PinnedIdentity).is_some());
        assert!(config.authenticator(AuthAlgorithm::CertificateChain).is_none());
        assert!(config.validator(AuthAlgorithm::Unauthenticated).is_some());
    }
}

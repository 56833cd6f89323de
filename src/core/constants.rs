//! Protocol constants for QLIC.
//!
//! Wire-visible values MUST NOT be changed without bumping the protocol.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// AES-128-GCM authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Record key size (AES-128).
pub const RECORD_KEY_SIZE: usize = 16;

/// Record IV / nonce size.
pub const RECORD_IV_SIZE: usize = 12;

/// HKDF-SHA256 secret and transcript hash size.
pub const HASH_SIZE: usize = 32;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Handshake hello nonce size.
pub const HELLO_NONCE_SIZE: usize = 32;

// =============================================================================
// KEY SCHEDULE LABELS
// =============================================================================

/// Prefix prepended to every HKDF label.
pub const LABEL_PREFIX: &[u8] = b"qlic ";

/// Root secret label.
pub const LABEL_DERIVED: &[u8] = b"derived";

/// Handshake-phase secret label.
pub const LABEL_HANDSHAKE_PHASE: &[u8] = b"hs traffic";

/// Session-phase secret label.
pub const LABEL_SESSION_PHASE: &[u8] = b"ap traffic";

/// Client traffic secret label.
pub const LABEL_CLIENT_TRAFFIC: &[u8] = b"c traffic";

/// Server traffic secret label.
pub const LABEL_SERVER_TRAFFIC: &[u8] = b"s traffic";

/// Record key label.
pub const LABEL_KEY: &[u8] = b"key";

/// Record IV label.
pub const LABEL_IV: &[u8] = b"iv";

/// Signature context for the server's AuthVerify.
pub const SERVER_VERIFY_CONTEXT: &[u8] = b"QLIC, server AuthVerify";

/// Signature context for the client's AuthVerify.
pub const CLIENT_VERIFY_CONTEXT: &[u8] = b"QLIC, client AuthVerify";

/// Certificate signature context.
pub const CERTIFICATE_CONTEXT: &[u8] = b"QLIC, certificate";

// =============================================================================
// PACKET & FRAME SIZES
// =============================================================================

/// Default preferred packet size.
pub const DEFAULT_PACKET_SIZE: usize = 1024;

/// Smallest packet size accepted by the configuration.
pub const MIN_PACKET_SIZE: usize = 128;

/// Largest packet body accepted from the wire.
pub const MAX_PACKET_BODY: usize = 65536;

/// Bytes left unused at the end of every drained packet.
pub const PACKET_HEADROOM: usize = 8;

/// Largest handshake message accepted by the reassembler.
pub const MAX_HANDSHAKE_MESSAGE: usize = 65536;

/// Largest single stream write, and the most a receiver buffers while
/// reassembling one.
pub const MAX_STREAM_MESSAGE: usize = 1 << 20;

/// Largest close reason sent on the wire.
pub const MAX_CLOSE_REASON: usize = 32;

// =============================================================================
// TRAFFIC THRESHOLDS
// =============================================================================

/// Unacknowledged sent bytes, in packets, that trigger throttling
/// (expressed as numerator / denominator: 2.5).
pub const THROTTLE_PACKETS_NUM: usize = 5;

/// See [`THROTTLE_PACKETS_NUM`].
pub const THROTTLE_PACKETS_DEN: usize = 2;

// =============================================================================
// TIMING CONSTANTS
// =============================================================================

/// Default handshake timeout.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Send keep-alive pings if idle for this long.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Writer wake-up interval when no keep-alive is configured.
pub const WRITER_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on waiting for a close frame to flush before teardown.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// CONNECTION CLOSE CODES
// =============================================================================

/// No error.
pub const NO_ERROR: u64 = 0x00;

/// Internal error.
pub const INTERNAL_ERROR: u64 = 0x01;

/// Malformed or unexpected input.
pub const PROTOCOL_VIOLATION: u64 = 0x02;

/// Peer failed authentication.
pub const AUTHORIZATION_FAILED: u64 = 0x03;

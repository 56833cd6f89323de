//! Error types for the QLIC protocol.

use thiserror::Error;

use super::constants::{AUTHORIZATION_FAILED, INTERNAL_ERROR, NO_ERROR, PROTOCOL_VIOLATION};

/// Errors raised while decoding wire input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of data.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// Unknown frame type tag.
    #[error("unknown frame type: {0:#04x}")]
    UnknownFrameType(u64),

    /// Unknown handshake message tag.
    #[error("unknown handshake message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Declared length exceeds what is allowed.
    #[error("length {actual} exceeds limit {limit}")]
    TooLong {
        /// Declared length.
        actual: usize,
        /// Allowed maximum.
        limit: usize,
    },

    /// Structurally valid input carrying an invalid value.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Record counter exhausted - connection must terminate.
    #[error("record counter exhausted - connection must terminate")]
    CounterExhaustion,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// A derivation step ran before its input secret existed.
    #[error("missing secret: {0}")]
    MissingSecret(&'static str),

    /// Malformed public key or signature.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Top-level QLIC errors.
#[derive(Debug, Error)]
pub enum QlicError {
    /// Malformed or unexpected peer input.
    #[error("bad request: {0}")]
    BadRequest(#[from] DecodeError),

    /// Peer failed authentication or no algorithm could be agreed.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O error on the underlying socket.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not permitted in the current state.
    #[error("invalid state: {0}")]
    InternalState(String),

    /// Handshake did not complete in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Nothing was received for longer than the configured idle timeout.
    #[error("idle timeout")]
    IdleTimeout,

    /// The connection is closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The peer closed the connection with a protocol error.
    #[error("peer closed connection (code {error_code:#x}): {reason}")]
    PeerClosed {
        /// Close error code.
        error_code: u64,
        /// Close reason.
        reason: String,
    },

    /// The write was cancelled or dropped before reaching the socket.
    #[error("send aborted")]
    SendAborted,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl QlicError {
    /// Error code carried by a ConnectionCloseProtocol frame for this error,
    /// or `None` when no close frame should be attempted.
    pub fn close_code(&self) -> Option<u64> {
        match self {
            Self::BadRequest(_) => Some(PROTOCOL_VIOLATION),
            Self::Authorization(_) => Some(AUTHORIZATION_FAILED),
            Self::Crypto(CryptoError::CounterExhaustion) | Self::InternalState(_) => {
                Some(INTERNAL_ERROR)
            }
            Self::HandshakeTimeout => Some(NO_ERROR),
            _ => None,
        }
    }
}

/// Result alias for QLIC operations.
pub type Result<T> = std::result::Result<T, QlicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes() {
        let err = QlicError::from(DecodeError::UnexpectedEof);
        assert_eq!(err.close_code(), Some(PROTOCOL_VIOLATION));

        let err = QlicError::Authorization("no algorithm".into());
        assert_eq!(err.close_code(), Some(AUTHORIZATION_FAILED));

        // Transport faults cannot carry a close frame.
        let err = QlicError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(err.close_code(), None);
    }

    #[test]
    fn test_error_display() {
        let err = QlicError::PeerClosed {
            error_code: 0x2,
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "peer closed connection (code 0x2): boom");
    }
}

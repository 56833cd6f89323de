//! Handshake message codec.
//!
//! Every message starts with a one-byte type tag:
//!
//! ```text
//! ClientHello  0x01  nonce(32) share(blob) supported(list) accepted(list)
//! ServerHello  0x02  nonce(32) share(blob)
//! AuthRequest  0x03  client_algorithm(varint) server_algorithm(varint)
//! AuthShare    0x04  share(blob)
//! AuthVerify   0x05  signature(blob)
//! ```
//!
//! A list is a varint count followed by one varint algorithm id per entry.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::{DecodeError, HELLO_NONCE_SIZE};
use crate::crypto::AuthAlgorithm;
use crate::transport::varint::{get_blob, get_varint, put_blob, put_varint};

/// Handshake message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client's opening message.
    ClientHello = 0x01,
    /// Server's key share.
    ServerHello = 0x02,
    /// Server's algorithm choice.
    AuthRequest = 0x03,
    /// Identity material.
    AuthShare = 0x04,
    /// Transcript signature.
    AuthVerify = 0x05,
}

impl MessageType {
    /// Parse a type tag.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::ClientHello),
            0x02 => Some(Self::ServerHello),
            0x03 => Some(Self::AuthRequest),
            0x04 => Some(Self::AuthShare),
            0x05 => Some(Self::AuthVerify),
            _ => None,
        }
    }
}

/// A decoded handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    /// Client's opening message.
    ClientHello {
        /// Random nonce.
        nonce: [u8; HELLO_NONCE_SIZE],
        /// X25519 public share.
        share: Bytes,
        /// Algorithms the client can authenticate with, in preference order.
        supported_local: Vec<AuthAlgorithm>,
        /// Algorithms the client accepts from the server, in preference order.
        accepted_remote: Vec<AuthAlgorithm>,
    },
    /// Server's key share.
    ServerHello {
        /// Random nonce.
        nonce: [u8; HELLO_NONCE_SIZE],
        /// X25519 public share.
        share: Bytes,
    },
    /// 1-based indexes into the ClientHello lists; 0 means no match.
    AuthRequest {
        /// Index into `supported_local`.
        client_algorithm: u64,
        /// Index into `accepted_remote`.
        server_algorithm: u64,
    },
    /// Identity material bound to the transcript.
    AuthShare {
        /// Algorithm-specific share.
        share: Bytes,
    },
    /// Signature over the transcript.
    AuthVerify {
        /// Algorithm-specific signature.
        signature: Bytes,
    },
}

impl HandshakeMessage {
    /// This message's type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ClientHello { .. } => MessageType::ClientHello,
            Self::ServerHello { .. } => MessageType::ServerHello,
            Self::AuthRequest { .. } => MessageType::AuthRequest,
            Self::AuthShare { .. } => MessageType::AuthShare,
            Self::AuthVerify { .. } => MessageType::AuthVerify,
        }
    }

    /// Serialize, tag included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.message_type() as u8);
        match self {
            Self::ClientHello {
                nonce,
                share,
                supported_local,
                accepted_remote,
            } => {
                buf.put_slice(nonce);
                put_blob(&mut buf, share);
                put_algorithms(&mut buf, supported_local);
                put_algorithms(&mut buf, accepted_remote);
            }
            Self::ServerHello { nonce, share } => {
                buf.put_slice(nonce);
                put_blob(&mut buf, share);
            }
            Self::AuthRequest {
                client_algorithm,
                server_algorithm,
            } => {
                put_varint(&mut buf, *client_algorithm);
                put_varint(&mut buf, *server_algorithm);
            }
            Self::AuthShare { share } => put_blob(&mut buf, share),
            Self::AuthVerify { signature } => put_blob(&mut buf, signature),
        }
        buf.freeze()
    }

    /// Parse one complete message. Trailing bytes are an error.
    pub fn decode(mut buf: Bytes) -> Result<Self, DecodeError> {
        if !buf.has_remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let tag = buf.get_u8();
        let message_type = MessageType::from_byte(tag).ok_or(DecodeError::UnknownMessageType(tag))?;

        let message = match message_type {
            MessageType::ClientHello => Self::ClientHello {
                nonce: get_nonce(&mut buf)?,
                share: get_blob(&mut buf)?,
                supported_local: get_algorithms(&mut buf)?,
                accepted_remote: get_algorithms(&mut buf)?,
            },
            MessageType::ServerHello => Self::ServerHello {
                nonce: get_nonce(&mut buf)?,
                share: get_blob(&mut buf)?,
            },
            MessageType::AuthRequest => Self::AuthRequest {
                client_algorithm: get_varint(&mut buf)?,
                server_algorithm: get_varint(&mut buf)?,
            },
            MessageType::AuthShare => Self::AuthShare {
                share: get_blob(&mut buf)?,
            },
            MessageType::AuthVerify => Self::AuthVerify {
                signature: get_blob(&mut buf)?,
            },
        };
        if buf.has_remaining() {
            return Err(DecodeError::InvalidEncoding(format!(
                "{} trailing bytes after {:?}",
                buf.remaining(),
                message_type
            )));
        }
        Ok(message)
    }
}

fn get_nonce(buf: &mut Bytes) -> Result<[u8; HELLO_NONCE_SIZE], DecodeError> {
    if buf.remaining() < HELLO_NONCE_SIZE {
        return Err(DecodeError::UnexpectedEof);
    }
    let mut nonce = [0u8; HELLO_NONCE_SIZE];
    buf.copy_to_slice(&mut nonce);
    Ok(nonce)
}

fn put_algorithms(buf: &mut BytesMut, algorithms: &[AuthAlgorithm]) {
    put_varint(buf, algorithms.len() as u64);
    for algorithm in algorithms {
        put_varint(buf, u64::from(algorithm.id()));
    }
}

fn get_algorithms(buf: &mut Bytes) -> Result<Vec<AuthAlgorithm>, DecodeError> {
    let count = get_varint(buf)?;
    // Each entry takes at least one byte.
    if count > buf.remaining() as u64 {
        return Err(DecodeError::UnexpectedEof);
    }
    (0..count)
        .map(|_| {
            let id = get_varint(buf)?;
            u8::try_from(id)
                .map(AuthAlgorithm::from_id)
                .map_err(|_| DecodeError::InvalidEncoding(format!("algorithm id {id}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_hello() -> HandshakeMessage {
        HandshakeMessage::ClientHello {
            nonce: [3u8; HELLO_NONCE_SIZE],
            share: Bytes::from_static(&[9u8; 32]),
            supported_local: vec![AuthAlgorithm::PinnedIdentity, AuthAlgorithm::Unknown(0x42)],
            accepted_remote: vec![AuthAlgorithm::CertificateChain],
        }
    }

    #[test]
    fn test_client_hello_layout() {
        let encoded = client_hello().encode();
        assert_eq!(encoded[0], 0x01);
        assert_eq!(&encoded[1..33], &[3u8; 32]);
        assert_eq!(encoded[33], 32);
        // supported: count 2, ids 0x01 and 0x42 (two-byte varint)
        assert_eq!(&encoded[66..70], &[0x02, 0x01, 0x40, 0x42]);
        assert_eq!(&encoded[70..], &[0x01, 0x02]);
        assert_eq!(HandshakeMessage::decode(encoded).unwrap(), client_hello());
    }

    #[test]
    fn test_auth_messages_decode() {
        let request = HandshakeMessage::AuthRequest {
            client_algorithm: 1,
            server_algorithm: 0,
        };
        let encoded = request.encode();
        assert_eq!(&encoded[..], &[0x03, 0x01, 0x00]);
        assert_eq!(HandshakeMessage::decode(encoded).unwrap(), request);

        let verify = HandshakeMessage::AuthVerify {
            signature: Bytes::new(),
        };
        assert_eq!(&verify.encode()[..], &[0x05, 0x00]);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            HandshakeMessage::decode(Bytes::new()),
            Err(DecodeError::UnexpectedEof)
        );
        assert_eq!(
            HandshakeMessage::decode(Bytes::from_static(&[0x09])),
            Err(DecodeError::UnknownMessageType(0x09))
        );
        // ServerHello with a short nonce.
        assert_eq!(
            HandshakeMessage::decode(Bytes::from_static(&[0x02, 1, 2, 3])),
            Err(DecodeError::UnexpectedEof)
        );
        assert!(matches!(
            HandshakeMessage::decode(Bytes::from_static(&[0x04, 0x00, 0xff])),
            Err(DecodeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_algorithm_list_count_is_bounded() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x01);
        buf.put_slice(&[0u8; HELLO_NONCE_SIZE]);
        put_blob(&mut buf, &[]);
        put_varint(&mut buf, 1_000_000);
        assert_eq!(
            HandshakeMessage::decode(buf.freeze()),
            Err(DecodeError::UnexpectedEof)
        );
    }
}

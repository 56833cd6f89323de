//! Packet framing over a byte-stream socket.
//!
//! ```text
//! +----------------+--------------------------------------+
//! | length varint  | body (sealed record once keyed)      |
//! +----------------+--------------------------------------+
//! ```
//!
//! The raw length prefix is the record's associated data.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::core::{DecodeError, MAX_PACKET_BODY, QlicError};
use crate::crypto::SecurityManager;

use super::varint::{get_varint, put_varint, varint_len, varint_len_from_first};

/// Encode the length prefix for a body of `body_len` bytes.
pub fn encode_packet_prefix(body_len: usize) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(varint_len(body_len as u64));
    put_varint(&mut prefix, body_len as u64);
    prefix
}

/// Split a complete packet into `(prefix_len, body_len)`.
pub fn split_packet_prefix(packet: &[u8]) -> Result<(usize, usize), DecodeError> {
    let first = *packet.first().ok_or(DecodeError::UnexpectedEof)?;
    let prefix_len = varint_len_from_first(first);
    let mut prefix = packet.get(..prefix_len).ok_or(DecodeError::UnexpectedEof)?;
    let body_len = get_varint(&mut prefix)? as usize;
    Ok((prefix_len, body_len))
}

/// A packet read from the wire.
#[derive(Debug, Clone)]
pub struct InboundPacket {
    /// Opened body: a sequence of encoded frames.
    pub body: Bytes,
    /// Bytes the packet occupied on the wire, prefix included.
    pub wire_len: usize,
}

/// Writes packets to the socket's write half.
pub struct PacketWriter<W> {
    sink: W,
    security: Arc<SecurityManager>,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    /// Wrap `sink`.
    pub fn new(sink: W, security: Arc<SecurityManager>) -> Self {
        Self { sink, security }
    }

    /// Seal and write one packet body. Returns the bytes written.
    pub async fn write_packet(&mut self, plaintext: &[u8]) -> Result<usize, QlicError> {
        let packet = self.security.seal_packet(plaintext)?;
        self.sink.write_all(&packet).await?;
        self.sink.flush().await?;
        trace!(plaintext = plaintext.len(), wire = packet.len(), "packet written");
        Ok(packet.len())
    }

    /// Shut the write half down.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.sink.shutdown().await
    }
}

/// Reads packets from the socket's read half.
pub struct PacketReader<R> {
    source: R,
    security: Arc<SecurityManager>,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Wrap `source`.
    pub fn new(source: R, security: Arc<SecurityManager>) -> Self {
        Self { source, security }
    }

    /// Read and open the next packet.
    ///
    /// Returns `Ok(None)` when the peer closed the socket at a packet
    /// boundary. A body longer than [`MAX_PACKET_BODY`] is a bad request.
    pub async fn read_packet(&mut self) -> Result<Option<InboundPacket>, QlicError> {
        let first = match self.source.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let prefix_len = varint_len_from_first(first);
        let mut prefix = [0u8; 8];
        prefix[0] = first;
        self.source.read_exact(&mut prefix[1..prefix_len]).await?;
        let prefix = &prefix[..prefix_len];

        let body_len = get_varint(&mut &prefix[..])? as usize;
        if body_len > MAX_PACKET_BODY {
            return Err(DecodeError::TooLong {
                actual: body_len,
                limit: MAX_PACKET_BODY,
            }
            .into());
        }
        let mut body = BytesMut::zeroed(body_len);
        self.source.read_exact(&mut body).await?;

        let opened = self.security.open_packet(prefix, body.to_vec())?;
        trace!(wire = prefix_len + body_len, plaintext = opened.len(), "packet read");
        Ok(Some(InboundPacket {
            body: Bytes::from(opened),
            wire_len: prefix_len + body_len,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Role;
    use crate::crypto::Phase;

    fn pair() -> (Arc<SecurityManager>, Arc<SecurityManager>) {
        (
            Arc::new(SecurityManager::new(Role::Client)),
            Arc::new(SecurityManager::new(Role::Server)),
        )
    }

    #[test]
    fn test_prefix_helpers() {
        let prefix = encode_packet_prefix(300);
        assert_eq!(prefix.len(), 2);
        assert!(prefix.capacity() < 300);
        let mut packet = prefix.clone();
        packet.extend_from_slice(&[0u8; 300]);
        assert_eq!(split_packet_prefix(&packet).unwrap(), (2, 300));
        assert!(split_packet_prefix(&[]).is_err());
        assert!(split_packet_prefix(&[0x40]).is_err());
    }

    #[tokio::test]
    async fn test_plaintext_packets_over_duplex() {
        let (client, server) = pair();
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = client.create_encrypted_stream(a);
        let mut reader = server.create_decrypted_stream(b);

        let n = writer.write_packet(b"first").await.unwrap();
        assert_eq!(n, 6);
        writer.write_packet(&[]).await.unwrap();

        let packet = reader.read_packet().await.unwrap().unwrap();
        assert_eq!(&packet.body[..], b"first");
        assert_eq!(packet.wire_len, 6);
        let packet = reader.read_packet().await.unwrap().unwrap();
        assert!(packet.body.is_empty());

        drop(writer);
        assert!(reader.read_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sealed_packets_over_duplex() {
        let (client, server) = pair();
        for side in [&client, &server] {
            side.update_transcript(b"hello");
            side.finalize_transcript();
            side.complete_key_exchange(&[9u8; 32]).unwrap();
            side.install_keys(&side.derive_keys(Phase::Session).unwrap())
                .unwrap();
        }

        let (a, b) = tokio::io::duplex(4096);
        let mut writer = client.create_encrypted_stream(a);
        let mut reader = server.create_decrypted_stream(b);
        for i in 0..3u8 {
            writer.write_packet(&[i; 100]).await.unwrap();
        }
        for i in 0..3u8 {
            let packet = reader.read_packet().await.unwrap().unwrap();
            assert_eq!(&packet.body[..], &[i; 100]);
        }
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (_, server) = pair();
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = server.create_decrypted_stream(b);

        let prefix = encode_packet_prefix(MAX_PACKET_BODY + 1);
        a.write_all(&prefix).await.unwrap();
        assert!(matches!(
            reader.read_packet().await,
            Err(QlicError::BadRequest(DecodeError::TooLong { .. }))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_io_error() {
        let (_, server) = pair();
        let (mut a, b) = tokio::io::duplex(64);
        let mut reader = server.create_decrypted_stream(b);

        a.write_all(&[10, 1, 2, 3]).await.unwrap();
        drop(a);
        assert!(matches!(reader.read_packet().await, Err(QlicError::Io(_))));
    }
}

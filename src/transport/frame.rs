//! Frame encoding and decoding.
//!
//! A packet body is a sequence of frames, each starting with a varint type
//! tag:
//!
//! ```text
//! 0x00 Padding
//! 0x01 Ping
//! 0x02 Ack                        bytes_since_last_ack
//! 0x03 Crypto                     flags, data (blob)
//! 0x04 StreamReset                stream_id, error_code
//! 0x05 StreamStopSending          stream_id, error_code
//! 0x06 StreamData                 stream_id, flags, payload (blob)
//! 0x07 ConnectionCloseProtocol    error_code, frame_type, reason (blob)
//! 0x08 ConnectionCloseApplication error_code, reason (blob)
//! ```
//!
//! Flags: bit 0 = last fragment, bit 1 = fin.

use bytes::{Buf, BufMut, Bytes};

use crate::core::DecodeError;

use super::stream_id::StreamId;
use super::varint::{blob_len, get_blob, get_varint, max_blob_payload, put_blob, put_varint, varint_len};

/// Frame flag bits.
pub mod flags {
    /// Frame carries the final fragment of a message or write.
    pub const LAST_FRAGMENT: u8 = 0x01;
    /// Stream data ends the sender's output.
    pub const FIN: u8 = 0x02;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Single padding byte.
    Padding = 0x00,
    /// Liveness probe; the peer answers with an Ack.
    Ping = 0x01,
    /// Received-byte acknowledgment.
    Ack = 0x02,
    /// Handshake message fragment.
    Crypto = 0x03,
    /// Sender stops writing a stream.
    StreamReset = 0x04,
    /// Sender asks the peer to stop writing a stream.
    StreamStopSending = 0x05,
    /// Stream payload fragment.
    StreamData = 0x06,
    /// Connection closed due to a protocol error.
    ConnectionCloseProtocol = 0x07,
    /// Connection closed by the application.
    ConnectionCloseApplication = 0x08,
}

impl FrameType {
    /// Parse a frame type from its tag.
    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0x00 => Some(Self::Padding),
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Ack),
            0x03 => Some(Self::Crypto),
            0x04 => Some(Self::StreamReset),
            0x05 => Some(Self::StreamStopSending),
            0x06 => Some(Self::StreamData),
            0x07 => Some(Self::ConnectionCloseProtocol),
            0x08 => Some(Self::ConnectionCloseApplication),
            _ => None,
        }
    }

    /// The frame type's tag.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Padding byte.
    Padding,
    /// Ping.
    Ping,
    /// Acknowledges bytes received since the previous Ack.
    Ack {
        /// Received bytes covered by this acknowledgment.
        bytes_since_last_ack: u64,
    },
    /// Handshake message fragment.
    Crypto {
        /// Final fragment of the current handshake message.
        is_last_fragment: bool,
        /// Fragment bytes.
        data: Bytes,
    },
    /// The sender will not write to the stream any more.
    StreamReset {
        /// Stream.
        stream_id: StreamId,
        /// Application error code, 0 for a graceful close.
        error_code: u64,
    },
    /// The sender will not read from the stream any more.
    StreamStopSending {
        /// Stream.
        stream_id: StreamId,
        /// Application error code.
        error_code: u64,
    },
    /// Stream payload fragment.
    StreamData {
        /// Stream, with the write's urgency.
        stream_id: StreamId,
        /// Last write on this stream.
        fin: bool,
        /// Final fragment of the current write.
        is_last_fragment: bool,
        /// Fragment bytes.
        payload: Bytes,
    },
    /// Connection closed due to a protocol error.
    ConnectionCloseProtocol {
        /// Error code.
        error_code: u64,
        /// Type of the frame that triggered the error, 0 if none.
        frame_type: u64,
        /// UTF-8 reason.
        reason: String,
    },
    /// Connection closed by the application.
    ConnectionCloseApplication {
        /// Application error code.
        error_code: u64,
        /// UTF-8 reason.
        reason: String,
    },
}

impl Frame {
    /// This frame's type.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Padding => FrameType::Padding,
            Frame::Ping => FrameType::Ping,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Crypto { .. } => FrameType::Crypto,
            Frame::StreamReset { .. } => FrameType::StreamReset,
            Frame::StreamStopSending { .. } => FrameType::StreamStopSending,
            Frame::StreamData { .. } => FrameType::StreamData,
            Frame::ConnectionCloseProtocol { .. } => FrameType::ConnectionCloseProtocol,
            Frame::ConnectionCloseApplication { .. } => FrameType::ConnectionCloseApplication,
        }
    }

    /// Number of bytes [`Frame::encode`] writes.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Frame::Padding | Frame::Ping => 0,
            Frame::Ack {
                bytes_since_last_ack,
            } => varint_len(*bytes_since_last_ack),
            Frame::Crypto { data, .. } => 1 + blob_len(data.len()),
            Frame::StreamReset {
                stream_id,
                error_code,
            }
            | Frame::StreamStopSending {
                stream_id,
                error_code,
            } => varint_len(stream_id.to_raw()) + varint_len(*error_code),
            Frame::StreamData {
                stream_id, payload, ..
            } => varint_len(stream_id.to_raw()) + 1 + blob_len(payload.len()),
            Frame::ConnectionCloseProtocol {
                error_code,
                frame_type,
                reason,
            } => varint_len(*error_code) + varint_len(*frame_type) + blob_len(reason.len()),
            Frame::ConnectionCloseApplication { error_code, reason } => {
                varint_len(*error_code) + blob_len(reason.len())
            }
        }
    }

    /// Append this frame to `buf`.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        put_varint(buf, u64::from(self.frame_type().as_byte()));
        match self {
            Frame::Padding | Frame::Ping => {}
            Frame::Ack {
                bytes_since_last_ack,
            } => put_varint(buf, *bytes_since_last_ack),
            Frame::Crypto {
                is_last_fragment,
                data,
            } => {
                buf.put_u8(fragment_flags(*is_last_fragment, false));
                put_blob(buf, data);
            }
            Frame::StreamReset {
                stream_id,
                error_code,
            }
            | Frame::StreamStopSending {
                stream_id,
                error_code,
            } => {
                put_varint(buf, stream_id.to_raw());
                put_varint(buf, *error_code);
            }
            Frame::StreamData {
                stream_id,
                fin,
                is_last_fragment,
                payload,
            } => {
                put_varint(buf, stream_id.to_raw());
                buf.put_u8(fragment_flags(*is_last_fragment, *fin));
                put_blob(buf, payload);
            }
            Frame::ConnectionCloseProtocol {
                error_code,
                frame_type,
                reason,
            } => {
                put_varint(buf, *error_code);
                put_varint(buf, *frame_type);
                put_blob(buf, reason.as_bytes());
            }
            Frame::ConnectionCloseApplication { error_code, reason } => {
                put_varint(buf, *error_code);
                put_blob(buf, reason.as_bytes());
            }
        }
    }

    /// Decode the next frame from `buf`.
    ///
    /// Returns `Ok(None)` once the input is exhausted.
    pub fn decode(buf: &mut Bytes) -> Result<Option<Frame>, DecodeError> {
        if !buf.has_remaining() {
            return Ok(None);
        }
        let tag = get_varint(buf)?;
        let frame_type = FrameType::from_tag(tag).ok_or(DecodeError::UnknownFrameType(tag))?;

        let frame = match frame_type {
            FrameType::Padding => Frame::Padding,
            FrameType::Ping => Frame::Ping,
            FrameType::Ack => Frame::Ack {
                bytes_since_last_ack: get_varint(buf)?,
            },
            FrameType::Crypto => {
                let flags = get_flags(buf)?;
                Frame::Crypto {
                    is_last_fragment: flags & flags::LAST_FRAGMENT != 0,
                    data: get_blob(buf)?,
                }
            }
            FrameType::StreamReset => Frame::StreamReset {
                stream_id: StreamId::from_raw(get_varint(buf)?),
                error_code: get_varint(buf)?,
            },
            FrameType::StreamStopSending => Frame::StreamStopSending {
                stream_id: StreamId::from_raw(get_varint(buf)?),
                error_code: get_varint(buf)?,
            },
            FrameType::StreamData => {
                let stream_id = StreamId::from_raw(get_varint(buf)?);
                let flags = get_flags(buf)?;
                Frame::StreamData {
                    stream_id,
                    fin: flags & flags::FIN != 0,
                    is_last_fragment: flags & flags::LAST_FRAGMENT != 0,
                    payload: get_blob(buf)?,
                }
            }
            FrameType::ConnectionCloseProtocol => Frame::ConnectionCloseProtocol {
                error_code: get_varint(buf)?,
                frame_type: get_varint(buf)?,
                reason: get_reason(buf)?,
            },
            FrameType::ConnectionCloseApplication => Frame::ConnectionCloseApplication {
                error_code: get_varint(buf)?,
                reason: get_reason(buf)?,
            },
        };
        Ok(Some(frame))
    }
}

fn fragment_flags(is_last_fragment: bool, fin: bool) -> u8 {
    let mut bits = 0;
    if is_last_fragment {
        bits |= flags::LAST_FRAGMENT;
    }
    if fin {
        bits |= flags::FIN;
    }
    bits
}

fn get_flags(buf: &mut Bytes) -> Result<u8, DecodeError> {
    if !buf.has_remaining() {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(buf.get_u8())
}

fn get_reason(buf: &mut Bytes) -> Result<String, DecodeError> {
    let raw = get_blob(buf)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| DecodeError::InvalidEncoding("close reason is not UTF-8".into()))
}

/// Largest Crypto frame payload that fits in `capacity` bytes.
pub fn max_crypto_payload(capacity: usize) -> Option<usize> {
    // tag + flags
    max_blob_payload(capacity.checked_sub(2)?)
}

/// Largest StreamData payload for `stream_id` that fits in `capacity` bytes.
pub fn max_stream_payload(capacity: usize, stream_id: StreamId) -> Option<usize> {
    // tag + id + flags
    let overhead = 1 + varint_len(stream_id.to_raw()) + 1;
    max_blob_payload(capacity.checked_sub(overhead)?)
}

/// Truncate `reason` to at most `limit` bytes on a character boundary.
pub fn truncate_reason(reason: &str, limit: usize) -> String {
    if reason.len() <= limit {
        return reason.to_owned();
    }
    let mut end = limit;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_owned()
}

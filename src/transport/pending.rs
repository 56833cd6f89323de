//! Outbound frames waiting for packet space.
//!
//! Control frames are sent whole or deferred. Crypto and stream writes are
//! cut into as many fragments as the packet budget requires; the final
//! fragment carries the last-fragment flag (and fin, for a final write).

use bytes::Bytes;

use crate::flow::Priority;

use super::frame::{Frame, max_crypto_payload, max_stream_payload};
use super::stream_id::StreamId;

#[derive(Debug)]
enum Body {
    Whole(Option<Frame>),
    Crypto {
        data: Bytes,
        offset: usize,
        started: bool,
    },
    Stream {
        stream_id: StreamId,
        fin: bool,
        data: Bytes,
        offset: usize,
        started: bool,
    },
}

/// A frame, or a fragmentable write, queued for transmission.
#[derive(Debug)]
pub struct PendingFrame {
    priority: Priority,
    body: Body,
}

impl PendingFrame {
    /// A frame that must fit into a single packet.
    pub fn whole(frame: Frame, priority: Priority) -> Self {
        Self {
            priority,
            body: Body::Whole(Some(frame)),
        }
    }

    /// A handshake message carried in Crypto frames.
    pub fn crypto(data: Bytes, priority: Priority) -> Self {
        Self {
            priority,
            body: Body::Crypto {
                data,
                offset: 0,
                started: false,
            },
        }
    }

    /// One application write on a stream. The write's urgency is the
    /// stream id's urgency.
    pub fn stream_data(stream_id: StreamId, data: Bytes, fin: bool) -> Self {
        Self {
            priority: stream_id.urgency(),
            body: Body::Stream {
                stream_id,
                fin,
                data,
                offset: 0,
                started: false,
            },
        }
    }

    /// Scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether any part of this frame has been handed out.
    pub fn is_started(&self) -> bool {
        match &self.body {
            Body::Whole(frame) => frame.is_none(),
            Body::Crypto { started, .. } | Body::Stream { started, .. } => *started,
        }
    }

    /// Whether a frame can still be produced.
    pub fn has_remaining_data(&self) -> bool {
        match &self.body {
            Body::Whole(frame) => frame.is_some(),
            Body::Crypto {
                data,
                offset,
                started,
            }
            | Body::Stream {
                data,
                offset,
                started,
                ..
            } => !*started || *offset < data.len(),
        }
    }

    /// Only not-yet-started, non-final stream writes may be cancelled.
    pub fn is_cancelable(&self) -> bool {
        matches!(
            self.body,
            Body::Stream {
                fin: false,
                started: false,
                ..
            }
        )
    }

    /// Produce the largest frame whose encoding fits in `limit` bytes.
    ///
    /// Returns `None` if nothing fits or nothing remains.
    pub fn get(&mut self, limit: usize) -> Option<Frame> {
        if !self.has_remaining_data() {
            return None;
        }
        match &mut self.body {
            Body::Whole(slot) => {
                if slot.as_ref()?.encoded_len() <= limit {
                    slot.take()
                } else {
                    None
                }
            }
            Body::Crypto {
                data,
                offset,
                started,
            } => {
                let max = max_crypto_payload(limit)?;
                let chunk = take_chunk(data, offset, started, max)?;
                Some(Frame::Crypto {
                    is_last_fragment: *offset == data.len(),
                    data: chunk,
                })
            }
            Body::Stream {
                stream_id,
                fin,
                data,
                offset,
                started,
            } => {
                let max = max_stream_payload(limit, *stream_id)?;
                let chunk = take_chunk(data, offset, started, max)?;
                let is_last_fragment = *offset == data.len();
                Some(Frame::StreamData {
                    stream_id: *stream_id,
                    fin: *fin && is_last_fragment,
                    is_last_fragment,
                    payload: chunk,
                })
            }
        }
    }
}

/// Advance the cursor by up to `max` bytes. A non-empty remainder needs at
/// least one byte of room; an empty write is emitted exactly once.
fn take_chunk(data: &Bytes, offset: &mut usize, started: &mut bool, max: usize) -> Option<Bytes> {
    let remaining = data.len() - *offset;
    if remaining > 0 && max == 0 {
        return None;
    }
    let n = remaining.min(max);
    let chunk = data.slice(*offset..*offset + n);
    *offset += n;
    *started = true;
    Some(chunk)
}

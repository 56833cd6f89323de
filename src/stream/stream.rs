//! A single multiplexed stream.
//!
//! Each stream owns a dynamic-priority [`FlowQueue`](crate::flow::FlowQueue) registered with the
//! connection's scheduler. Input and output shut down independently; the
//! stream is closed once both are, and [`StreamEvent::Closed`] is delivered
//! exactly once.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::core::{DecodeError, MAX_STREAM_MESSAGE, QlicError};
use crate::flow::{Priority, QueueHandle, QueueKey};
use crate::transport::{Frame, PendingFrame, StreamId};

use super::manager::StreamManager;

/// Events delivered to a stream's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One complete peer write.
    Data {
        /// Payload.
        data: Bytes,
        /// The peer will not write again.
        fin: bool,
    },
    /// Both directions are shut down. Delivered once, last.
    Closed,
}

struct StreamState {
    input_open: bool,
    output_open: bool,
    closed: bool,
    incoming: BytesMut,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

pub(crate) struct StreamShared {
    id: StreamId,
    queue: QueueHandle,
    manager: Weak<StreamManager>,
    state: Mutex<StreamState>,
}

/// Handle to a stream. Cheap to clone.
#[derive(Clone)]
pub struct Stream {
    shared: Arc<StreamShared>,
}

impl StreamShared {
    pub(crate) fn new(
        id: StreamId,
        input_open: bool,
        output_open: bool,
        queue: QueueHandle,
        manager: Weak<StreamManager>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Self {
            id,
            queue,
            manager,
            state: Mutex::new(StreamState {
                input_open,
                output_open,
                closed: false,
                incoming: BytesMut::new(),
                events: Some(events),
            }),
        });
        (shared, receiver)
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn id(&self) -> StreamId {
        self.id
    }

    fn control_frame(&self, frame: Frame) {
        let priority = self.id.urgency();
        if self
            .queue
            .add_last(PendingFrame::whole(frame, priority), None)
            .is_none()
        {
            debug!(stream = %self.id, "stream queue gone, control frame dropped");
        }
    }

    /// Deliver `Closed` if both halves are shut down. Must be called after
    /// releasing the state lock.
    fn finish_if_closed(&self) {
        let events = {
            let mut state = self.lock();
            if state.closed || state.input_open || state.output_open {
                return;
            }
            state.closed = true;
            state.events.take()
        };
        debug!(stream = %self.id, "stream closed");
        if let Some(events) = events {
            let _ = events.send(StreamEvent::Closed);
        }
        self.queue.retire();
        if let Some(manager) = self.manager.upgrade() {
            manager.on_stream_closed(self.id);
        }
    }

    /// Apply a peer frame. Fails when the peer overruns the reassembly
    /// buffer.
    pub(crate) fn handle_frame(&self, frame: Frame) -> Result<(), QlicError> {
        match frame {
            Frame::StreamData {
                fin,
                is_last_fragment,
                payload,
                ..
            } => self.on_data(payload, is_last_fragment, fin)?,
            Frame::StreamReset { error_code, .. } => {
                debug!(stream = %self.id, error_code, "peer reset stream");
                let mut state = self.lock();
                state.input_open = false;
                state.incoming.clear();
            }
            Frame::StreamStopSending { error_code, .. } => {
                debug!(stream = %self.id, error_code, "peer stopped reading");
                let was_open = {
                    let mut state = self.lock();
                    std::mem::replace(&mut state.output_open, false)
                };
                if was_open {
                    self.queue.cancel_pending_writes();
                    self.control_frame(Frame::StreamReset {
                        stream_id: self.id,
                        error_code: 0,
                    });
                }
            }
            other => {
                debug!(stream = %self.id, frame_type = ?other.frame_type(), "ignoring frame");
                return Ok(());
            }
        }
        self.finish_if_closed();
        Ok(())
    }

    fn on_data(&self, payload: Bytes, is_last_fragment: bool, fin: bool) -> Result<(), QlicError> {
        let mut state = self.lock();
        if !state.input_open {
            trace!(stream = %self.id, len = payload.len(), "data after input shutdown dropped");
            return Ok(());
        }
        let total = state.incoming.len() + payload.len();
        if total > MAX_STREAM_MESSAGE {
            state.incoming.clear();
            return Err(DecodeError::TooLong {
                actual: total,
                limit: MAX_STREAM_MESSAGE,
            }
            .into());
        }
        state.incoming.extend_from_slice(&payload);
        if !is_last_fragment {
            return Ok(());
        }
        let data = state.incoming.split().freeze();
        if fin {
            state.input_open = false;
        }
        if let Some(events) = &state.events {
            let _ = events.send(StreamEvent::Data { data, fin });
        }
        Ok(())
    }

    /// Shut both halves down without notifying the peer. Used at connection
    /// teardown.
    pub(crate) fn terminate(&self) {
        {
            let mut state = self.lock();
            state.input_open = false;
            state.output_open = false;
        }
        self.finish_if_closed();
    }
}

impl Stream {
    pub(crate) fn from_shared(shared: Arc<StreamShared>) -> Self {
        Self { shared }
    }

    /// This stream's id.
    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    /// Whether the peer may still send to us.
    pub fn is_input_open(&self) -> bool {
        self.shared.lock().input_open
    }

    /// Whether we may still send.
    pub fn is_output_open(&self) -> bool {
        self.shared.lock().output_open
    }

    /// Queue one write. `last` shuts output down after it.
    ///
    /// Fails once output is shut down, or if `data` is larger than the
    /// peer will reassemble.
    pub fn send(&self, data: Bytes, last: bool, urgency: Priority) -> Result<SendHandle, QlicError> {
        let shared = &self.shared;
        if data.len() > MAX_STREAM_MESSAGE {
            return Err(QlicError::InternalState(format!(
                "write of {} bytes exceeds {MAX_STREAM_MESSAGE}",
                data.len()
            )));
        }
        let (tx, rx) = oneshot::channel();
        let key = {
            let mut state = shared.lock();
            if !state.output_open {
                return Err(QlicError::InternalState(format!(
                    "stream {} output is shut down",
                    shared.id
                )));
            }
            let stream_id = shared.id.with_urgency(urgency);
            let len = data.len();
            let key = shared
                .queue
                .add_last(
                    PendingFrame::stream_data(stream_id, data, last),
                    Some(Box::new(move || {
                        let _ = tx.send(());
                    })),
                )
                .ok_or(QlicError::ConnectionClosed)?;
            if last {
                state.output_open = false;
            }
            trace!(stream = %shared.id, len, last, %urgency, "write queued");
            key
        };
        if last {
            shared.finish_if_closed();
        }
        Ok(SendHandle {
            sent: rx,
            key,
            queue: shared.queue.clone(),
        })
    }

    /// Close both directions, telling the peer.
    ///
    /// Sends StreamReset if output is open and StreamStopSending if input
    /// is open.
    pub fn close(&self) {
        let shared = &self.shared;
        let (input_open, output_open) = {
            let mut state = shared.lock();
            let open = (state.input_open, state.output_open);
            state.input_open = false;
            state.output_open = false;
            open
        };
        if output_open {
            shared.control_frame(Frame::StreamReset {
                stream_id: shared.id,
                error_code: 0,
            });
        }
        if input_open {
            shared.control_frame(Frame::StreamStopSending {
                stream_id: shared.id,
                error_code: 0,
            });
        }
        shared.finish_if_closed();
    }

    /// Close both directions silently, dropping writes not yet started.
    pub fn abort(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.lock();
            state.input_open = false;
            state.output_open = false;
        }
        let dropped = shared.queue.cancel_pending_writes();
        debug!(stream = %shared.id, dropped, "stream aborted");
        shared.finish_if_closed();
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Stream")
            .field("id", &self.shared.id)
            .field("input_open", &state.input_open)
            .field("output_open", &state.output_open)
            .finish()
    }
}

/// Tracks one queued write.
pub struct SendHandle {
    sent: oneshot::Receiver<()>,
    key: QueueKey,
    queue: QueueHandle,
}

impl SendHandle {
    /// Wait until the write has been written to the socket.
    ///
    /// Fails with [`QlicError::SendAborted`] if it was cancelled or the
    /// connection went away first.
    pub async fn sent(self) -> Result<(), QlicError> {
        self.sent.await.map_err(|_| QlicError::SendAborted)
    }

    /// Cancel the write if no part of it has been sent yet.
    pub fn cancel(&self) -> bool {
        self.queue.cancel(self.key)
    }
}

impl std::fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendHandle").field("key", &self.key).finish()
    }
}

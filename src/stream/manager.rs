//! Stream routing and allocation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::{DecodeError, QlicError, Role};
use crate::engine::ConnectionEvent;
use crate::flow::{FlowControl, FlowQueue, Priority};
use crate::transport::{Frame, FrameHandler, MAX_STREAM_NUMBER, StreamId};

use super::stream::{Stream, StreamEvent, StreamShared};

/// Closed stream numbers of one initiator: everything below `floor` plus
/// the out-of-order closes above it.
#[derive(Debug, Default)]
struct Retired {
    floor: u64,
    above: BTreeSet<u64>,
}

impl Retired {
    fn contains(&self, number: u64) -> bool {
        number < self.floor || self.above.contains(&number)
    }

    fn insert(&mut self, number: u64) {
        if number < self.floor {
            return;
        }
        self.above.insert(number);
        while self.above.remove(&self.floor) {
            self.floor += 1;
        }
    }
}

struct ManagerState {
    streams: HashMap<StreamId, Arc<StreamShared>>,
    retired_client: Retired,
    retired_server: Retired,
    next_number: u64,
    shutdown: bool,
}

impl ManagerState {
    fn retired(&mut self, id: StreamId) -> &mut Retired {
        if id.is_client_initiated() {
            &mut self.retired_client
        } else {
            &mut self.retired_server
        }
    }
}

/// Owns every live stream of a connection.
///
/// Allocates local stream ids, creates peer streams the first time a frame
/// names them and routes stream frames. Once the handshake input is
/// finished it is the connection's active frame handler.
pub struct StreamManager {
    role: Role,
    weak_self: Weak<StreamManager>,
    flow: Arc<FlowControl<FlowQueue>>,
    connection_events: mpsc::UnboundedSender<ConnectionEvent>,
    state: Mutex<ManagerState>,
}

impl StreamManager {
    /// Create a manager whose streams schedule on `flow`.
    pub fn new(
        role: Role,
        flow: Arc<FlowControl<FlowQueue>>,
        connection_events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            role,
            weak_self: weak_self.clone(),
            flow,
            connection_events,
            state: Mutex::new(ManagerState {
                streams: HashMap::new(),
                retired_client: Retired::default(),
                retired_server: Retired::default(),
                next_number: 0,
                shutdown: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create(&self, id: StreamId, local: bool) -> (Arc<StreamShared>, mpsc::UnboundedReceiver<StreamEvent>) {
        let uni = id.is_unidirectional();
        let input_open = !(uni && local);
        let output_open = !(uni && !local);
        let queue = self.flow.register_data_source(FlowQueue::dynamic());
        StreamShared::new(id, input_open, output_open, queue, self.weak_self.clone())
    }

    /// Open a local stream. A unidirectional stream is output-only.
    pub fn open_stream(
        &self,
        unidirectional: bool,
    ) -> Result<(Stream, mpsc::UnboundedReceiver<StreamEvent>), QlicError> {
        let mut state = self.lock();
        if state.shutdown {
            return Err(QlicError::ConnectionClosed);
        }
        if state.next_number > MAX_STREAM_NUMBER {
            return Err(QlicError::InternalState("stream ids exhausted".into()));
        }
        let id = StreamId::new(state.next_number, self.role, unidirectional, Priority::DEFAULT);
        state.next_number += 1;
        let (shared, events) = self.create(id, true);
        state.streams.insert(id, Arc::clone(&shared));
        debug!(stream = %id, unidirectional, "stream opened");
        Ok((Stream::from_shared(shared), events))
    }

    /// Find the stream a frame names, creating peer streams on first sight.
    /// Returns `None` for retired streams.
    fn route(&self, id: StreamId) -> Result<Option<Arc<StreamShared>>, QlicError> {
        let mut state = self.lock();
        if state.shutdown {
            return Ok(None);
        }
        if let Some(stream) = state.streams.get(&id) {
            return Ok(Some(Arc::clone(stream)));
        }
        if state.retired(id).contains(id.number()) {
            debug!(stream = %id, "frame for retired stream dropped");
            return Ok(None);
        }
        if id.initiator() == self.role {
            return Err(DecodeError::InvalidEncoding(format!("unknown local stream {id}")).into());
        }

        let (shared, events) = self.create(id, false);
        state.streams.insert(id, Arc::clone(&shared));
        debug!(stream = %id, unidirectional = id.is_unidirectional(), "peer opened stream");
        let _ = self.connection_events.send(ConnectionEvent::StreamOpened {
            stream: Stream::from_shared(Arc::clone(&shared)),
            events,
        });
        Ok(Some(shared))
    }

    /// Forget a stream that has fully closed. Its id is never reused.
    pub(crate) fn on_stream_closed(&self, id: StreamId) {
        let mut state = self.lock();
        state.streams.remove(&id);
        state.retired(id).insert(id.number());
    }

    /// Number of live streams.
    pub fn stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    #[cfg(test)]
    fn retired_backlog(&self) -> usize {
        let mut state = self.lock();
        state.retired_client.above.len() + state.retired_server.above.len()
    }

    /// Close every stream without notifying the peer and refuse new ones.
    pub fn shutdown(&self) {
        let streams = {
            let mut state = self.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            std::mem::take(&mut state.streams)
        };
        info!(role = ?self.role, streams = streams.len(), "stream manager shut down");
        for stream in streams.into_values() {
            stream.terminate();
        }
    }
}

impl FrameHandler for StreamManager {
    fn handle_frame(&self, frame: Frame) -> Result<Option<Frame>, QlicError> {
        let id = match &frame {
            Frame::StreamData { stream_id, .. }
            | Frame::StreamReset { stream_id, .. }
            | Frame::StreamStopSending { stream_id, .. } => *stream_id,
            _ => return Ok(Some(frame)),
        };
        if let Some(stream) = self.route(id)? {
            stream.handle_frame(frame)?;
        }
        Ok(None)
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("role", &self.role)
            .field("streams", &self.stream_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MAX_STREAM_MESSAGE;
    use bytes::Bytes;

    struct Fixture {
        flow: Arc<FlowControl<FlowQueue>>,
        manager: Arc<StreamManager>,
        connection: mpsc::UnboundedReceiver<ConnectionEvent>,
    }

    fn fixture(role: Role) -> Fixture {
        let flow = Arc::new(FlowControl::new());
        let (tx, connection) = mpsc::unbounded_channel();
        let manager = StreamManager::new(role, Arc::clone(&flow), tx);
        Fixture {
            flow,
            manager,
            connection,
        }
    }

    fn drain(flow: &FlowControl<FlowQueue>) -> Vec<Frame> {
        let mut out = Vec::new();
        let (_, completions) = flow.write_data_to_stream(&mut out, 4096);
        completions.fire();
        let mut buf = Bytes::from(out);
        let mut frames = Vec::new();
        while let Some(frame) = Frame::decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn data(id: StreamId, payload: &'static [u8], last: bool, fin: bool) -> Frame {
        Frame::StreamData {
            stream_id: id,
            fin,
            is_last_fragment: last,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_local_ids_are_sequential() {
        let f = fixture(Role::Client);
        let (a, _) = f.manager.open_stream(false).unwrap();
        let (b, _) = f.manager.open_stream(true).unwrap();
        assert_eq!(a.id().number(), 0);
        assert_eq!(b.id().number(), 1);
        assert!(a.id().is_client_initiated());
        assert!(b.id().is_unidirectional());
        assert!(!b.is_input_open());
        assert!(b.is_output_open());
        assert_eq!(f.manager.stream_count(), 2);
    }

    #[tokio::test]
    async fn test_send_reaches_queue_and_resolves() {
        let f = fixture(Role::Client);
        let (stream, _) = f.manager.open_stream(false).unwrap();
        let handle = stream
            .send(Bytes::from_static(b"hello"), false, Priority::new(5).unwrap())
            .unwrap();

        let frames = drain(&f.flow);
        assert_eq!(frames.len(), 1);
        let Frame::StreamData {
            stream_id,
            payload,
            fin,
            ..
        } = &frames[0]
        else {
            panic!("expected stream data, got {:?}", frames[0]);
        };
        assert_eq!(*stream_id, stream.id());
        assert_eq!(stream_id.urgency(), Priority::new(5).unwrap());
        assert_eq!(&payload[..], b"hello");
        assert!(!fin);
        handle.sent().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_send_aborts() {
        let f = fixture(Role::Client);
        let (stream, _) = f.manager.open_stream(false).unwrap();
        let handle = stream
            .send(Bytes::from_static(b"never"), false, Priority::DEFAULT)
            .unwrap();
        assert!(handle.cancel());
        assert!(drain(&f.flow).is_empty());
        assert!(matches!(handle.sent().await, Err(QlicError::SendAborted)));
    }

    #[test]
    fn test_last_blocks_further_sends() {
        let f = fixture(Role::Client);
        let (stream, _) = f.manager.open_stream(false).unwrap();
        stream
            .send(Bytes::from_static(b"bye"), true, Priority::DEFAULT)
            .unwrap();
        assert!(!stream.is_output_open());
        assert!(matches!(
            stream.send(Bytes::new(), false, Priority::DEFAULT),
            Err(QlicError::InternalState(_))
        ));
    }

    #[test]
    fn test_peer_stream_created_and_reassembled() {
        let mut f = fixture(Role::Server);
        let id = StreamId::new(0, Role::Client, false, Priority::DEFAULT);
        assert!(f.manager.handle_frame(data(id, b"hel", false, false)).unwrap().is_none());

        let Ok(ConnectionEvent::StreamOpened { stream, mut events }) = f.connection.try_recv()
        else {
            panic!("expected StreamOpened");
        };
        assert_eq!(stream.id(), id);
        assert!(events.try_recv().is_err());

        f.manager.handle_frame(data(id, b"lo", true, true)).unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            StreamEvent::Data {
                data: Bytes::from_static(b"hello"),
                fin: true
            }
        );
        assert!(!stream.is_input_open());
        assert!(stream.is_output_open());
    }

    #[test]
    fn test_remote_unidirectional_is_input_only() {
        let mut f = fixture(Role::Client);
        let id = StreamId::new(3, Role::Server, true, Priority::DEFAULT);
        f.manager.handle_frame(data(id, b"x", true, false)).unwrap();
        let Ok(ConnectionEvent::StreamOpened { stream, .. }) = f.connection.try_recv() else {
            panic!("expected StreamOpened");
        };
        assert!(stream.is_input_open());
        assert!(!stream.is_output_open());
    }

    #[test]
    fn test_close_emits_reset_and_stop_sending_once() {
        let f = fixture(Role::Client);
        let (stream, mut events) = f.manager.open_stream(false).unwrap();
        stream.close();
        stream.close();

        let frames = drain(&f.flow);
        assert_eq!(
            frames,
            vec![
                Frame::StreamReset {
                    stream_id: stream.id(),
                    error_code: 0
                },
                Frame::StreamStopSending {
                    stream_id: stream.id(),
                    error_code: 0
                },
            ]
        );
        assert_eq!(events.try_recv().unwrap(), StreamEvent::Closed);
        assert!(events.try_recv().is_err());
        assert_eq!(f.manager.stream_count(), 0);
    }

    #[test]
    fn test_abort_sends_nothing() {
        let f = fixture(Role::Client);
        let (stream, mut events) = f.manager.open_stream(false).unwrap();
        stream
            .send(Bytes::from_static(b"pending"), false, Priority::DEFAULT)
            .unwrap();
        stream.abort();
        assert!(drain(&f.flow).is_empty());
        assert_eq!(events.try_recv().unwrap(), StreamEvent::Closed);
    }

    #[test]
    fn test_stop_sending_answered_with_reset() {
        let f = fixture(Role::Client);
        let (stream, _events) = f.manager.open_stream(false).unwrap();
        stream
            .send(Bytes::from_static(b"unsent"), false, Priority::DEFAULT)
            .unwrap();
        f.manager
            .handle_frame(Frame::StreamStopSending {
                stream_id: stream.id(),
                error_code: 7,
            })
            .unwrap();
        assert!(!stream.is_output_open());
        assert_eq!(
            drain(&f.flow),
            vec![Frame::StreamReset {
                stream_id: stream.id(),
                error_code: 0
            }]
        );
    }

    #[test]
    fn test_closed_streams_are_not_recreated() {
        let mut f = fixture(Role::Server);
        let id = StreamId::new(0, Role::Client, false, Priority::DEFAULT);
        f.manager.handle_frame(data(id, b"x", true, true)).unwrap();
        let Ok(ConnectionEvent::StreamOpened { stream, mut events }) = f.connection.try_recv()
        else {
            panic!("expected StreamOpened");
        };
        stream.close();
        assert!(matches!(events.try_recv(), Ok(StreamEvent::Data { .. })));
        assert_eq!(events.try_recv().unwrap(), StreamEvent::Closed);

        f.manager.handle_frame(data(id, b"late", true, false)).unwrap();
        assert!(f.connection.try_recv().is_err());
        assert_eq!(f.manager.stream_count(), 0);
    }

    #[test]
    fn test_retired_ids_collapse_into_floor() {
        let f = fixture(Role::Client);
        let streams: Vec<_> = (0..1000)
            .map(|_| f.manager.open_stream(false).unwrap().0)
            .collect();
        for stream in streams.iter().step_by(2) {
            stream.abort();
        }
        // Stream 0 closed, stream 1 still open: evens above 1 wait.
        assert_eq!(f.manager.retired_backlog(), 499);

        for stream in streams.iter().skip(1).step_by(2) {
            stream.abort();
        }
        assert_eq!(f.manager.stream_count(), 0);
        assert_eq!(f.manager.retired_backlog(), 0);
        assert_eq!(f.manager.lock().retired_client.floor, 1000);
    }

    #[test]
    fn test_peer_resets_keep_retired_set_bounded() {
        let mut f = fixture(Role::Server);
        for number in 0..10_000 {
            let id = StreamId::new(number, Role::Client, true, Priority::DEFAULT);
            f.manager
                .handle_frame(Frame::StreamReset {
                    stream_id: id,
                    error_code: 0,
                })
                .unwrap();
        }
        assert_eq!(f.manager.stream_count(), 0);
        assert_eq!(f.flow.source_count(), 0);
        assert_eq!(f.manager.retired_backlog(), 0);

        while f.connection.try_recv().is_ok() {}
        let late = StreamId::new(5, Role::Client, true, Priority::DEFAULT);
        f.manager.handle_frame(data(late, b"late", true, true)).unwrap();
        assert!(f.connection.try_recv().is_err());
    }

    #[test]
    fn test_oversized_reassembly_is_bad_request() {
        let mut f = fixture(Role::Server);
        let id = StreamId::new(0, Role::Client, false, Priority::DEFAULT);
        let chunk = Bytes::from(vec![0u8; 64 * 1024]);
        for _ in 0..MAX_STREAM_MESSAGE / chunk.len() {
            let frame = Frame::StreamData {
                stream_id: id,
                fin: false,
                is_last_fragment: false,
                payload: chunk.clone(),
            };
            assert!(f.manager.handle_frame(frame).unwrap().is_none());
        }
        let Ok(ConnectionEvent::StreamOpened { mut events, .. }) = f.connection.try_recv() else {
            panic!("expected StreamOpened");
        };

        let overflow = data(id, b"x", true, true);
        assert!(matches!(
            f.manager.handle_frame(overflow),
            Err(QlicError::BadRequest(DecodeError::TooLong { .. }))
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_oversized_write_rejected() {
        let f = fixture(Role::Client);
        let (stream, _) = f.manager.open_stream(false).unwrap();
        let big = Bytes::from(vec![0u8; MAX_STREAM_MESSAGE + 1]);
        assert!(matches!(
            stream.send(big, false, Priority::DEFAULT),
            Err(QlicError::InternalState(_))
        ));
        assert!(stream.is_output_open());
    }

    #[test]
    fn test_unknown_local_stream_is_bad_request() {
        let f = fixture(Role::Client);
        let id = StreamId::new(9, Role::Client, false, Priority::DEFAULT);
        assert!(matches!(
            f.manager.handle_frame(data(id, b"x", true, false)),
            Err(QlicError::BadRequest(_))
        ));
    }

    #[test]
    fn test_shutdown_closes_every_stream_once() {
        let f = fixture(Role::Client);
        let (_a, mut a_events) = f.manager.open_stream(false).unwrap();
        let (_b, mut b_events) = f.manager.open_stream(true).unwrap();
        f.manager.shutdown();
        f.manager.shutdown();
        assert_eq!(a_events.try_recv().unwrap(), StreamEvent::Closed);
        assert_eq!(b_events.try_recv().unwrap(), StreamEvent::Closed);
        assert!(a_events.try_recv().is_err());
        assert!(matches!(
            f.manager.open_stream(false),
            Err(QlicError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_non_stream_frames_pass_through() {
        let f = fixture(Role::Client);
        assert_eq!(
            f.manager.handle_frame(Frame::Ping).unwrap(),
            Some(Frame::Ping)
        );
    }
}

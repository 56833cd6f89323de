//! The protocol engine: one secured, multiplexed connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::core::{CLOSE_FLUSH_TIMEOUT, MAX_CLOSE_REASON, QlicError, Role};
use crate::crypto::{PeerIdentity, SecurityManager};
use crate::flow::{FlowControl, FlowQueue, Priority, QueueHandle};
use crate::handshake::{Handshake, HandshakeStatus};
use crate::stream::{Stream, StreamEvent, StreamManager};
use crate::transport::{ConnectionPhase, Frame, PendingFrame, TrafficManager, truncate_reason};

use super::config::{EngineConfig, HandshakeMode};
use super::events::ConnectionEvent;

/// Settings the application may change while connected.
#[derive(Debug, Clone, Copy)]
pub(super) struct Settings {
    pub(super) low_latency: bool,
    pub(super) keep_alive: Option<Duration>,
    pub(super) idle_timeout: Option<Duration>,
}

/// State shared by the engine handle, the reader and the writer.
pub(super) struct EngineInner {
    pub(super) role: Role,
    weak_self: Weak<EngineInner>,
    pub(super) packet_size: usize,
    handshake_timeout: Duration,
    pub(super) throttle_floor: Priority,
    pre_shared_secret: Option<Zeroizing<Vec<u8>>>,
    pub(super) security: Arc<SecurityManager>,
    pub(super) flow: Arc<FlowControl<FlowQueue>>,
    pub(super) control: QueueHandle,
    pub(super) handshake: Option<Arc<Handshake>>,
    pub(super) streams: Arc<StreamManager>,
    pub(super) traffic: Mutex<TrafficManager>,
    settings: Mutex<Settings>,
    phase: watch::Sender<ConnectionPhase>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    stop: watch::Sender<bool>,
    started: AtomicBool,
    failed: AtomicBool,
    stopped: AtomicBool,
}

/// A QLIC connection over one duplex socket.
///
/// # Example
///
/// ```ignore
/// let config = EngineConfig::builder(Role::Client)
///     .auth(AuthConfig::pinned(identity, vec![server_key]))
///     .build()?;
/// let (engine, mut events) = ProtocolEngine::new(config)?;
///
/// if engine.start(socket).await {
///     let (stream, mut incoming) = engine.open_stream(false)?;
///     stream.send(Bytes::from_static(b"hello"), true, Priority::DEFAULT)?;
/// }
/// ```
pub struct ProtocolEngine {
    inner: Arc<EngineInner>,
}

impl ProtocolEngine {
    /// Create an engine. Connection events arrive on the returned receiver.
    ///
    /// Fails if `config` does not pass [`EngineConfig::validate`].
    pub fn new(
        config: EngineConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>), QlicError> {
        config.validate()?;
        let (events, receiver) = mpsc::unbounded_channel();
        let security = Arc::new(SecurityManager::new(config.role));
        let flow = Arc::new(FlowControl::new());
        let control = flow.register_data_source(FlowQueue::fixed(Priority::MAX));

        let (handshake, pre_shared_secret) = match config.mode {
            HandshakeMode::Authenticated(auth) => (
                Some(Handshake::new(
                    config.role,
                    Arc::clone(&security),
                    control.clone(),
                    auth,
                )),
                None,
            ),
            HandshakeMode::PreSharedSecret(secret) => (None, Some(Zeroizing::new(secret))),
        };
        let streams = StreamManager::new(config.role, Arc::clone(&flow), events.clone());
        let (phase, _) = watch::channel(ConnectionPhase::Idle);
        let (stop, _) = watch::channel(false);

        let inner = Arc::new_cyclic(|weak_self| EngineInner {
            role: config.role,
            weak_self: weak_self.clone(),
            packet_size: config.packet_size,
            handshake_timeout: config.handshake_timeout,
            throttle_floor: config.throttle_floor,
            pre_shared_secret,
            security,
            flow,
            control,
            handshake,
            streams,
            traffic: Mutex::new(TrafficManager::new(config.packet_size)),
            settings: Mutex::new(Settings {
                low_latency: config.low_latency,
                keep_alive: config.keep_alive,
                idle_timeout: config.idle_timeout,
            }),
            phase,
            events,
            stop,
            started: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });
        Ok((Self { inner }, receiver))
    }

    /// Attach `socket`, run the handshake and wait for it.
    ///
    /// Returns `true` once session keys are installed in both directions.
    /// On failure or timeout the connection is torn down, the cause is
    /// reported as [`ConnectionEvent::Error`] and `false` is returned.
    pub async fn start<S>(&self, socket: S) -> bool
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::AcqRel) {
            warn!(role = ?inner.role, "engine already started");
            return false;
        }
        if inner.is_stopped() {
            return false;
        }
        inner.set_phase(ConnectionPhase::Handshaking);

        let (read_half, write_half) = tokio::io::split(socket);
        let writer = inner.security.create_encrypted_stream(write_half);
        let reader = inner.security.create_decrypted_stream(read_half);
        tokio::spawn(Arc::clone(inner).write_loop(writer));

        let Some(handshake) = inner.handshake.clone() else {
            let installed = match &inner.pre_shared_secret {
                Some(secret) => inner.security.install_pre_shared_secret(secret),
                None => Ok(()),
            };
            if let Err(err) = installed {
                inner.fail(err.into());
                return false;
            }
            tokio::spawn(Arc::clone(inner).read_loop(reader));
            return inner.establish();
        };

        if let Err(err) = handshake.start() {
            inner.fail(err);
            return false;
        }
        tokio::spawn(Arc::clone(inner).read_loop(reader));

        let mut status = handshake.status();
        let outcome = tokio::time::timeout(inner.handshake_timeout, async move {
            status
                .wait_for(|status| *status != HandshakeStatus::Pending)
                .await
                .map(|status| status.clone())
        })
        .await;

        match outcome {
            Ok(Ok(HandshakeStatus::Complete)) => inner.establish(),
            Ok(_) => {
                let err = handshake
                    .take_failure()
                    .unwrap_or(QlicError::ConnectionClosed);
                inner.fail(err);
                false
            }
            Err(_) => {
                inner.fail(QlicError::HandshakeTimeout);
                false
            }
        }
    }

    /// Open a local stream. A unidirectional stream is output-only.
    pub fn open_stream(
        &self,
        unidirectional: bool,
    ) -> Result<(Stream, mpsc::UnboundedReceiver<StreamEvent>), QlicError> {
        match self.inner.phase() {
            ConnectionPhase::Established => self.inner.streams.open_stream(unidirectional),
            ConnectionPhase::Idle | ConnectionPhase::Handshaking => Err(
                QlicError::InternalState("connection not established".into()),
            ),
            _ => Err(QlicError::ConnectionClosed),
        }
    }

    /// Enable or disable low-latency mode.
    pub fn set_low_latency(&self, enabled: bool) {
        self.inner.lock_settings().low_latency = enabled;
        if !enabled {
            self.inner.flow.stop_throttling();
        }
        debug!(role = ?self.inner.role, enabled, "low-latency mode");
    }

    /// Change the keep-alive interval. `None` disables keep-alive pings.
    pub fn set_keep_alive(&self, interval: Option<Duration>) -> Result<(), QlicError> {
        if interval.is_some_and(|interval| interval.is_zero()) {
            return Err(QlicError::Config("keep-alive interval must be non-zero".into()));
        }
        self.inner.lock_settings().keep_alive = interval;
        self.inner.flow.interrupt();
        Ok(())
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.inner.phase()
    }

    /// Watch lifecycle phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.inner.phase.subscribe()
    }

    /// Which end of the connection this is.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// The authenticated peer, if the handshake validated one.
    pub fn peer_identity(&self) -> Option<PeerIdentity> {
        self.inner
            .handshake
            .as_ref()
            .and_then(|handshake| handshake.peer_identity())
    }

    /// Snapshot of the traffic counters.
    pub fn traffic(&self) -> TrafficManager {
        self.inner.lock_traffic().clone()
    }

    /// Tear the connection down now. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Tell the peer the connection is closing, then tear down once the
    /// close frame is written.
    ///
    /// `reason` is truncated to [`MAX_CLOSE_REASON`] bytes.
    pub fn shutdown_gracefully(&self, error_code: u64, reason: &str) {
        let inner = &self.inner;
        if inner.is_stopped() {
            return;
        }
        if !inner.phase().is_established() {
            inner.shutdown();
            return;
        }
        inner.set_phase(ConnectionPhase::Closing);
        info!(role = ?inner.role, error_code, reason, "closing connection");
        inner.close_with(Frame::ConnectionCloseApplication {
            error_code,
            reason: truncate_reason(reason, MAX_CLOSE_REASON),
        });
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("role", &self.inner.role)
            .field("phase", &self.inner.phase())
            .field("streams", &self.inner.streams.stream_count())
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    pub(super) fn lock_traffic(&self) -> MutexGuard<'_, TrafficManager> {
        self.traffic
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn lock_settings(&self) -> MutexGuard<'_, Settings> {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn settings(&self) -> Settings {
        *self.lock_settings()
    }

    pub(super) fn phase(&self) -> ConnectionPhase {
        *self.phase.borrow()
    }

    pub(super) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(super) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Move to `next` unless the connection has already ended.
    fn set_phase(&self, next: ConnectionPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if phase.is_terminal() || *phase == next {
                return false;
            }
            *phase = next;
            true
        })
    }

    /// Handshaking -> Established. Fails if anything ended the connection
    /// first.
    fn establish(&self) -> bool {
        let established = self.phase.send_if_modified(|phase| {
            if *phase != ConnectionPhase::Handshaking {
                return false;
            }
            *phase = ConnectionPhase::Established;
            true
        });
        if established {
            info!(role = ?self.role, "connection established");
            // Timers only run while established.
            self.flow.interrupt();
        }
        established
    }

    /// Queue a frame on the control queue.
    pub(super) fn queue_control(&self, frame: Frame, first: bool) {
        let pending = PendingFrame::whole(frame, Priority::MAX);
        let queued = if first {
            self.control.add_first(pending, None)
        } else {
            self.control.add_last(pending, None)
        };
        if queued.is_none() {
            debug!(role = ?self.role, "control queue gone, frame dropped");
        }
    }

    /// Queue `frame`, then shut down once it is written or after
    /// [`CLOSE_FLUSH_TIMEOUT`], whichever comes first.
    fn close_with(&self, frame: Frame) {
        let weak = self.weak_self.clone();
        let queued = self.control.add_last(
            PendingFrame::whole(frame, Priority::MAX),
            Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.shutdown();
                }
            })),
        );
        if queued.is_none() {
            self.shutdown();
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let weak = self.weak_self.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(CLOSE_FLUSH_TIMEOUT).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.shutdown();
                    }
                });
            }
            Err(_) => self.shutdown(),
        }
    }

    /// Report `err`, tell the peer if the error has a close code, and tear
    /// down. Only the first failure is reported.
    pub(super) fn fail(&self, err: QlicError) {
        if self.is_stopped() {
            debug!(role = ?self.role, error = %err, "error after shutdown");
            return;
        }
        if self.failed.swap(true, Ordering::AcqRel) {
            debug!(role = ?self.role, error = %err, "connection already failing");
            return;
        }
        error!(role = ?self.role, error = %err, "connection failed");
        self.phase.send_modify(|phase| {
            if !phase.is_terminal() {
                *phase = ConnectionPhase::Failed;
            }
        });
        if let Some(handshake) = &self.handshake {
            handshake.close();
        }
        self.stop.send_replace(true);

        let close = err.close_code().map(|error_code| Frame::ConnectionCloseProtocol {
            error_code,
            frame_type: 0,
            reason: truncate_reason(&err.to_string(), MAX_CLOSE_REASON),
        });
        let _ = self.events.send(ConnectionEvent::Error(err));
        match close {
            Some(frame) => self.close_with(frame),
            None => self.shutdown(),
        }
    }

    /// Tear everything down. Idempotent; the first call sends
    /// [`ConnectionEvent::Stopped`].
    pub(super) fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.phase.send_modify(|phase| {
            if !phase.is_terminal() {
                *phase = ConnectionPhase::Closed;
            }
        });
        if let Some(handshake) = &self.handshake {
            handshake.close();
        }
        self.flow.shutdown();
        self.stop.send_replace(true);
        self.streams.shutdown();
        info!(role = ?self.role, phase = %self.phase(), "connection stopped");
        let _ = self.events.send(ConnectionEvent::Stopped);
    }
}

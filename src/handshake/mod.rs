//! QLIC handshake.
//!
//! A linear state machine per role that establishes handshake keys from an
//! X25519 exchange, authenticates one or both peers and switches to session
//! keys. Messages travel in Crypto frames on the control queue.
//!
//! ```text
//! Client                                Server
//!   ClientHello  ------------------>
//!                <------------------  ServerHello
//!                     [handshake keys]
//!                <------------------  AuthRequest
//!                <------------------  AuthShare
//!                <------------------  AuthVerify
//!   AuthShare    ------------------>
//!   AuthVerify   ------------------>
//!                     [session keys]
//! ```
//!
//! Only the expected next message type is processed; anything else is
//! ignored. After [`Handshake::close`] all input is dropped.

mod client;
mod message;
mod reassembly;
mod server;

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::{MAX_HANDSHAKE_MESSAGE, QlicError, Role};
use crate::crypto::{
    AuthAlgorithm, AuthConfig, Authenticator, EphemeralKeyExchange, PeerIdentity, PeerValidator,
    SecurityManager,
};
use crate::flow::{Completion, Priority, QueueHandle};
use crate::transport::{Frame, FrameHandler, PendingFrame};

pub use message::{HandshakeMessage, MessageType};
pub use reassembly::Reassembler;

/// Progress reported to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Still running.
    Pending,
    /// Session keys installed in both directions.
    Complete,
    /// Aborted, with a reason.
    Failed(String),
}

/// The algorithm lists from the ClientHello.
#[derive(Debug, Clone, Default)]
struct Offer {
    supported_local: Vec<AuthAlgorithm>,
    accepted_remote: Vec<AuthAlgorithm>,
}

/// The agreed algorithm pair, from this side's perspective.
struct Negotiated {
    authenticator: Arc<dyn Authenticator>,
    validator: Arc<dyn PeerValidator>,
}

struct HandshakeState {
    expected: Option<MessageType>,
    reassembler: Reassembler,
    exchange: Option<EphemeralKeyExchange>,
    offer: Offer,
    negotiated: Option<Negotiated>,
    peer: Option<PeerIdentity>,
    input_finished: bool,
    closed: bool,
}

/// Handshake driver for one connection.
pub struct Handshake {
    role: Role,
    weak_self: Weak<Handshake>,
    security: Arc<SecurityManager>,
    queue: QueueHandle,
    auth: AuthConfig,
    state: Mutex<HandshakeState>,
    status: watch::Sender<HandshakeStatus>,
    failure: Mutex<Option<QlicError>>,
}

impl Handshake {
    /// Create a handshake that sends on `queue` and keys `security`.
    pub fn new(
        role: Role,
        security: Arc<SecurityManager>,
        queue: QueueHandle,
        auth: AuthConfig,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(HandshakeStatus::Pending);
        Arc::new_cyclic(|weak_self| Self {
            role,
            weak_self: weak_self.clone(),
            security,
            queue,
            auth,
            state: Mutex::new(HandshakeState {
                expected: None,
                reassembler: Reassembler::new(MAX_HANDSHAKE_MESSAGE),
                exchange: None,
                offer: Offer::default(),
                negotiated: None,
                peer: None,
                input_finished: false,
                closed: false,
            }),
            status,
            failure: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HandshakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin: the client sends its ClientHello, the server waits for one.
    pub fn start(&self) -> Result<(), QlicError> {
        let mut state = self.lock();
        match self.role {
            Role::Client => self.send_client_hello(&mut state),
            Role::Server => {
                state.expected = Some(MessageType::ClientHello);
                Ok(())
            }
        }
    }

    /// Watch the handshake's progress.
    pub fn status(&self) -> watch::Receiver<HandshakeStatus> {
        self.status.subscribe()
    }

    /// Whether all handshake input has been consumed and the stream manager
    /// should take over inbound frames.
    pub fn is_input_finished(&self) -> bool {
        self.lock().input_finished
    }

    /// The authenticated peer, once validated.
    pub fn peer_identity(&self) -> Option<PeerIdentity> {
        self.lock().peer.clone()
    }

    /// The error that failed the handshake, if any. Taken once.
    pub fn take_failure(&self) -> Option<QlicError> {
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Stop processing input. A pending handshake is marked failed.
    pub fn close(&self) {
        self.lock().closed = true;
        self.status.send_if_modified(|status| {
            if *status != HandshakeStatus::Pending {
                return false;
            }
            *status = HandshakeStatus::Failed("handshake closed".into());
            true
        });
    }

    /// Abort with `err`.
    fn fail(&self, err: QlicError) {
        warn!(role = ?self.role, error = %err, "handshake failed");
        let reason = err.to_string();
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_or_insert(err);
        self.lock().closed = true;
        self.status.send_if_modified(|status| {
            if *status != HandshakeStatus::Pending {
                return false;
            }
            *status = HandshakeStatus::Failed(reason);
            true
        });
    }

    fn complete(&self) {
        let completed = self.status.send_if_modified(|status| {
            if *status != HandshakeStatus::Pending {
                return false;
            }
            *status = HandshakeStatus::Complete;
            true
        });
        if completed {
            info!(role = ?self.role, "handshake complete");
        }
    }

    /// Append a received message to the transcript.
    fn record(&self, raw: &[u8]) {
        self.security.update_transcript(raw);
        self.security.finalize_transcript();
    }

    /// Serialize `message` and append it to the transcript.
    fn record_outbound(&self, message: &HandshakeMessage) -> Bytes {
        let encoded = message.encode();
        self.record(&encoded);
        encoded
    }

    /// Queue serialized message bytes on the control queue.
    fn enqueue(&self, encoded: Bytes, on_sent: Option<Completion>) -> Result<(), QlicError> {
        let len = encoded.len();
        self.queue
            .add_last(PendingFrame::crypto(encoded, Priority::MAX), on_sent)
            .ok_or_else(|| QlicError::InternalState("control queue is closed".into()))?;
        debug!(role = ?self.role, len, "handshake message queued");
        Ok(())
    }

    /// Record and queue `message`.
    fn send(&self, message: HandshakeMessage, on_sent: Option<Completion>) -> Result<(), QlicError> {
        debug!(role = ?self.role, message_type = ?message.message_type(), "sending");
        let encoded = self.record_outbound(&message);
        self.enqueue(encoded, on_sent)
    }

    /// Completion that runs `f` once the message reaches the socket. An
    /// error fails the handshake.
    fn on_sent<F>(&self, f: F) -> Completion
    where
        F: FnOnce(&Handshake) -> Result<(), QlicError> + Send + 'static,
    {
        let weak = self.weak_self.clone();
        Box::new(move || {
            let Some(handshake) = weak.upgrade() else {
                return;
            };
            if let Err(err) = f(&handshake) {
                handshake.fail(err);
            }
        })
    }

    fn handle_message(&self, state: &mut HandshakeState, raw: Bytes) -> Result<(), QlicError> {
        let message = HandshakeMessage::decode(raw.clone())?;
        let message_type = message.message_type();
        if state.expected != Some(message_type) {
            debug!(
                role = ?self.role,
                ?message_type,
                expected = ?state.expected,
                "ignoring unexpected handshake message"
            );
            return Ok(());
        }
        debug!(role = ?self.role, ?message_type, len = raw.len(), "handshake message received");
        match self.role {
            Role::Client => self.client_handle(state, message, &raw),
            Role::Server => self.server_handle(state, message, &raw),
        }
    }
}

impl FrameHandler for Handshake {
    fn handle_frame(&self, frame: Frame) -> Result<Option<Frame>, QlicError> {
        let Frame::Crypto {
            is_last_fragment,
            data,
        } = frame
        else {
            return Ok(Some(frame));
        };
        let mut state = self.lock();
        if state.closed {
            return Ok(None);
        }
        if let Some(raw) = state.reassembler.push(&data, is_last_fragment)? {
            self.handle_message(&mut state, raw)?;
        }
        Ok(None)
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("role", &self.role)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

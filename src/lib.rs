//! # QLIC Protocol
//!
//! QLIC is a secure, multiplexed, ordered-stream transport that runs over any
//! duplex byte-stream socket. It provides:
//!
//! - **Security**: X25519 key exchange, HKDF-SHA256 key schedule, AES-128-GCM
//!   records
//! - **Authentication**: pluggable capabilities (pinned identity, certificate
//!   chain, platform attestation, none), negotiated per direction
//! - **Multiplexing**: bidirectional and unidirectional streams with eight
//!   urgency levels
//! - **Latency control**: priority scheduling, ack-driven throttling,
//!   keep-alive pings
//!
//! ## Modules
//!
//! - [`core`]: constants, error types, roles
//! - [`transport`]: varints, stream ids, frames, packets, traffic accounting
//! - [`flow`]: the output scheduler and its queues
//! - [`crypto`]: key schedule, record protection, authentication
//! - [`handshake`]: the handshake state machine
//! - [`stream`]: streams and the stream manager
//! - [`engine`]: [`ProtocolEngine`], one connection over one socket
//!
//! ## Example Usage
//!
//! ```ignore
//! use qlic_protocol::prelude::*;
//!
//! let identity = IdentityKeypair::generate();
//! let config = EngineConfig::builder(Role::Client)
//!     .auth(AuthConfig::pinned(identity, vec![server_key]))
//!     .build()?;
//! let (engine, mut events) = ProtocolEngine::new(config)?;
//!
//! if engine.start(socket).await {
//!     let (stream, mut incoming) = engine.open_stream(false)?;
//!     stream.send(Bytes::from_static(b"ping"), true, Priority::DEFAULT)?;
//!     while let Some(event) = incoming.recv().await {
//!         // StreamEvent::Data { .. } then StreamEvent::Closed
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod core;
pub mod crypto;
pub mod engine;
pub mod flow;
pub mod handshake;
pub mod stream;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{QlicError, Role};
    pub use crate::crypto::{
        AuthAlgorithm, AuthConfig, Authenticator, Certificate, CertificateChainAuthenticator,
        CertificateChainValidator, IdentityKeypair, PeerIdentity, PeerValidator,
        PinnedIdentityAuthenticator, PinnedIdentityValidator, Unauthenticated, VerifyingKey,
    };
    pub use crate::engine::{ConnectionEvent, EngineConfig, HandshakeMode, ProtocolEngine};
    pub use crate::flow::Priority;
    pub use crate::stream::{SendHandle, Stream, StreamEvent};
    pub use crate::transport::{ConnectionPhase, StreamId};
    pub use bytes::Bytes;
}

// Re-export commonly used items at crate root
pub use crate::core::{DecodeError, QlicError, Role};
pub use crate::engine::{ConnectionEvent, EngineConfig, ProtocolEngine};
pub use crate::stream::{Stream, StreamEvent};

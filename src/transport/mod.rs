//! QLIC transport layer.
//!
//! Wire encoding and packet plumbing:
//!
//! - **Varints and blobs**: QUIC-style variable-length integers
//! - **Stream ids**: [`StreamId`] packing number, urgency, direction, initiator
//! - **Frames**: [`Frame`] codec and fragment sizing helpers
//! - **Pending frames**: [`PendingFrame`], fragmentable outbound writes
//! - **Packets**: [`PacketWriter`] / [`PacketReader`] over the socket halves
//! - **Traffic**: [`TrafficManager`] byte accounting for acks and throttling
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Streams / Handshake               │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   frames, packets, traffic              │
//! ├─────────────────────────────────────────┤
//! │         Security Layer                  │
//! ├─────────────────────────────────────────┤
//! │      Duplex byte-stream socket          │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod frame;
mod handler;
mod packet;
mod pending;
mod stream_id;
mod traffic;
pub mod varint;

pub use connection::ConnectionPhase;
pub use frame::*;
pub use handler::FrameHandler;
pub use packet::*;
pub use pending::PendingFrame;
pub use stream_id::*;
pub use traffic::TrafficManager;

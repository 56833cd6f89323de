//! QLIC protocol engine.
//!
//! Ties one duplex socket to the security layer, the handshake, the output
//! scheduler and the stream manager. Two tasks run per connection:
//!
//! - **reader**: read packet, open, decode frames, dispatch
//! - **writer**: wait for data, drain a packet, seal, write, fire completions

mod config;
#[allow(clippy::module_inception)]
mod engine;
mod events;
mod reader;
mod writer;

pub use config::{DEFAULT_THROTTLE_FLOOR, EngineConfig, EngineConfigBuilder, HandshakeMode};
pub use engine::ProtocolEngine;
pub use events::ConnectionEvent;

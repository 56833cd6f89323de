//! QLIC streams.
//!
//! - [`StreamManager`]: allocates ids, routes inbound stream frames
//! - [`Stream`]: application handle with independent input/output halves
//! - [`SendHandle`]: resolves when a write reaches the socket

mod manager;
#[allow(clippy::module_inception)]
mod stream;

pub use manager::StreamManager;
pub use stream::{SendHandle, Stream, StreamEvent};

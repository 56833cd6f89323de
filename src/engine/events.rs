//! Connection-level events.

use tokio::sync::mpsc;

use crate::core::QlicError;
use crate::stream::{Stream, StreamEvent};

/// Events reported to the connection's owner.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The peer opened a stream.
    StreamOpened {
        /// The new stream.
        stream: Stream,
        /// Its event channel.
        events: mpsc::UnboundedReceiver<StreamEvent>,
    },
    /// The connection failed. Followed by [`ConnectionEvent::Stopped`].
    Error(QlicError),
    /// The connection has shut down. Sent once, last.
    Stopped,
}

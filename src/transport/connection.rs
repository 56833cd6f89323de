//! Connection lifecycle phase.

use std::fmt;

/// Connection lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Created, socket not attached yet.
    Idle,
    /// Handshake in progress.
    Handshaking,
    /// Keys installed, streams usable.
    Established,
    /// Graceful close requested; the close frame is being flushed.
    Closing,
    /// Connection closed.
    Closed,
    /// Connection failed (handshake, authentication, transport fault).
    Failed,
}

impl ConnectionPhase {
    /// Whether the connection has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether application streams may be opened.
    pub fn is_established(self) -> bool {
        self == Self::Established
    }
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Handshaking => "handshaking",
            Self::Established => "established",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

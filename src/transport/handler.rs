//! Inbound frame dispatch.

use crate::core::QlicError;

use super::frame::Frame;

/// Consumes inbound frames on behalf of a protocol layer.
///
/// The reader task offers every decoded frame to the active handler first.
/// A handler returns `Ok(None)` when it consumed the frame and `Ok(Some(frame))`
/// to hand it back for connection-level processing. An error is fatal to the
/// connection.
pub trait FrameHandler: Send + Sync {
    /// Handle one frame.
    fn handle_frame(&self, frame: Frame) -> Result<Option<Frame>, QlicError>;
}

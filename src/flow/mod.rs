//! QLIC Protocol - Output scheduling.
//!
//! - [`FlowControl`]: priority scheduler the writer drains packets from
//! - [`FlowQueue`]: per-stream and control queues of pending frames
//! - [`Priority`]: the eight scheduling levels
//! - [`Completions`]: callbacks fired once queued units reach the socket

mod completion;
mod control;
mod priority;
mod queue;

pub use completion::{Completion, Completions};
pub use control::{DataSource, DataSourceToken, FlowControl, SourceId};
pub use priority::Priority;
pub use queue::{FlowQueue, QueueHandle, QueueKey, QueuePriority};

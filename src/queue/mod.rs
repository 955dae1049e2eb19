//! Shared task queue with dependency ordering and stale-claim recovery.

pub mod board;
pub mod item;

pub use board::TaskQueue;
pub use item::{QueueItem, QueueStatus};

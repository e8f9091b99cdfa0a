//! Durable recipient state
//!
//! Handles:
//! - The pending recipient queue (overwritten on every commit)
//! - The append-only log of recipients included in accepted batches
//! - Restart recovery: the last committed state is what `load_pending` returns

mod queue;

pub use queue::{FileQueueStore, QueueStore, Recipient};

//! Bounded message buffer and per-topic summaries.

mod bounded;
mod summary;

pub use bounded::{BoundedMessageBuffer, BufferConfig, EvictionResult};
pub use summary::TopicSummary;

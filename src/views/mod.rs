//! Derived views over the buffer: filter chain and filtered lists.

mod filter;
mod filtered;

pub use filter::{FilterConfig, MessageFilter, TopicSubsetFilter, UniqueContentFilter};
pub use filtered::{FilteredView, ViewId, ViewSource};

use crate::types::{MessageId, MessageRecord};
use std::sync::Arc;

/// Read access shared by the buffer and every filtered view.
///
/// Indices are 1-based with 1 = most recent; 0 is never a valid index.
pub trait ViewRead {
    fn len(&self) -> usize;

    /// Record at a 1-based navigation index (1 = newest).
    fn get(&self, index: usize) -> Option<Arc<MessageRecord>>;

    /// Current 1-based navigation index of a record, if retained.
    fn index_of(&self, id: MessageId) -> Option<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

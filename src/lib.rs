//! # Spyglass
//!
//! An in-memory inspection core for message-broker traffic: a bounded
//! message store with filtered views, cursors, and search.
//!
//! ## Core Concepts
//!
//! - **Buffer**: Bounded retention with per-topic eviction floors
//! - **Views**: Derived projections (dedup, topic subsets), chainable
//! - **Cursors**: Stable 1-based navigation over a view (1 = newest)
//! - **Search**: Batch history scans and live matching into result views
//! - **Subscriptions**: Batched append/evict notifications with
//!   coalescing backpressure
//!
//! ## Example
//!
//! ```ignore
//! use spyglass::{MessageStore, StoreConfig, IncomingMessage, FilterConfig, ViewSource};
//!
//! let store = MessageStore::new(StoreConfig {
//!     max_size: 10_000,
//!     ..Default::default()
//! })?;
//!
//! // Submit decoded messages from any producer thread.
//! store.submit(IncomingMessage::new("sensors/temp", "22.5"))?;
//!
//! // A deduplicated projection of the buffer.
//! let view = store.create_view(FilterConfig::unique_only(), ViewSource::Buffer)?;
//!
//! // Navigate it.
//! let cursor = store.create_cursor(ViewSource::View(view));
//! store.cursor_first(cursor)?;
//! ```

pub mod buffer;
pub mod cursor;
mod dispatch;
pub mod error;
pub mod search;
pub mod store;
pub mod subscriptions;
pub mod types;
pub mod views;

// Re-exports
pub use buffer::{BoundedMessageBuffer, BufferConfig, EvictionResult, TopicSummary};
pub use cursor::{CursorEvent, CursorId, EventOrigin, NavigationCursor};
pub use error::{Result, StoreError};
pub use search::{MatcherError, ScriptPredicate, SearchConfig, SearchEngine, SearchId, SearchMatcher};
pub use store::{MessageStore, StoreConfig, StoreStats};
pub use subscriptions::{
    DropReason, MessageSummary, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::*;
pub use views::{FilterConfig, FilteredView, ViewId, ViewRead, ViewSource};

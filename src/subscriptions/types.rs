//! Subscription types for live store updates.

use crate::cursor::{CursorEvent, CursorId};
use crate::search::SearchId;
use crate::types::{FormatterSlot, MessageId, MessageRecord, Timestamp};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Max formatted-payload bytes included per message summary.
    /// Larger payloads are delivered without the preview. Default: 4096
    pub summary_payload_threshold: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            summary_payload_threshold: 4096,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Filter batches by topic (None = all topics).
    pub topics: Option<Vec<String>>,

    /// Only cursor events for these cursors (None = all cursors).
    pub cursors: Option<Vec<CursorId>>,

    /// Include appended/evicted batches.
    pub include_batches: bool,

    /// Include cursor navigation events.
    pub include_cursor_events: bool,

    /// Include search completion events.
    pub include_search_events: bool,
}

impl SubscriptionFilter {
    /// Subscribe to appended/evicted batches.
    pub fn batches() -> Self {
        Self {
            include_batches: true,
            ..Default::default()
        }
    }

    /// Subscribe to batches touching specific topics.
    pub fn topics(topics: Vec<String>) -> Self {
        Self {
            topics: Some(topics),
            include_batches: true,
            ..Default::default()
        }
    }

    /// Subscribe to cursor events for specific cursors.
    pub fn cursors(cursors: Vec<CursorId>) -> Self {
        Self {
            cursors: Some(cursors),
            include_cursor_events: true,
            ..Default::default()
        }
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            include_batches: true,
            include_cursor_events: true,
            include_search_events: true,
            ..Default::default()
        }
    }
}

/// Events emitted to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// One dispatcher batch: records appended and evicted since the last
    /// flush. When `coalesced` is set, per-record summaries were shed
    /// under backpressure and only the totals are reliable.
    Batch {
        appended: Vec<MessageSummary>,
        evicted: Vec<MessageId>,
        total_appended: usize,
        total_evicted: usize,
        coalesced: bool,
    },

    /// A cursor navigation notification.
    Cursor(CursorEvent),

    /// A batch search finished.
    SearchCompleted { search: SearchId, matches: usize },

    /// The store was cleared.
    Cleared,

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
    /// The store was closed.
    StoreClosed,
}

/// Summary of a record (for events; avoids shipping large payloads).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: MessageId,
    pub topic: String,
    pub timestamp: Timestamp,
    /// Raw payload size in bytes.
    pub payload_size: usize,
    /// Formatted payload (if small enough, otherwise None).
    pub formatted: Option<String>,
}

impl MessageSummary {
    /// Create a summary from a full record.
    pub fn from_record(record: &MessageRecord, slot: &FormatterSlot, threshold: usize) -> Self {
        let payload_size = record.raw_payload.len();
        let formatted = if payload_size <= threshold {
            Some(record.formatted_payload(slot).to_string())
        } else {
            None
        };

        Self {
            id: record.id,
            topic: record.topic.clone(),
            timestamp: record.timestamp,
            payload_size,
            formatted,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

//! Per-topic live aggregates.

use crate::types::{MessageRecord, Timestamp};
use std::sync::Arc;

/// Live aggregate for one observed topic.
///
/// `count` tracks messages ever seen on the topic for the lifetime of the
/// buffer; eviction only trims the retained record list and never rolls
/// the count back.
#[derive(Clone, Debug)]
pub struct TopicSummary {
    pub topic: String,
    /// Most recently accepted record for this topic.
    pub latest: Arc<MessageRecord>,
    /// Messages ever seen on this topic (monotonic; reset only by `clear`).
    pub count: u64,
    pub last_updated: Timestamp,
}

impl TopicSummary {
    pub(crate) fn new(record: Arc<MessageRecord>) -> Self {
        Self {
            topic: record.topic.clone(),
            last_updated: record.timestamp,
            count: 1,
            latest: record,
        }
    }

    pub(crate) fn observe(&mut self, record: Arc<MessageRecord>) {
        self.count += 1;
        self.last_updated = record.timestamp;
        self.latest = record;
    }
}

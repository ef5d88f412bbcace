//! The core ordered, bounded buffer.

use super::TopicSummary;
use crate::error::{Result, StoreError};
use crate::types::{MessageId, MessageRecord};
use crate::views::ViewRead;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Construction-time buffer configuration.
#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Maximum number of retained records. Zero makes the buffer a
    /// pass-through that only maintains topic summaries.
    pub max_size: usize,

    /// Eviction floor: while any topic retains more than this many
    /// records, eviction must not push another topic below it.
    pub min_retained_per_topic: Option<usize>,
}

impl BufferConfig {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            min_retained_per_topic: None,
        }
    }

    pub fn with_floor(mut self, floor: usize) -> Self {
        self.min_retained_per_topic = Some(floor);
        self
    }

    /// Validated eagerly at construction, never clamped at append time.
    pub fn validate(&self) -> Result<()> {
        if let Some(floor) = self.min_retained_per_topic {
            if floor >= self.max_size {
                return Err(StoreError::InvalidConfig(format!(
                    "min_retained_per_topic ({floor}) must be smaller than max_size ({})",
                    self.max_size
                )));
            }
        }
        Ok(())
    }
}

/// Records evicted by a single append, in eviction order.
#[derive(Debug, Default)]
pub struct EvictionResult {
    pub evicted: Vec<Arc<MessageRecord>>,
}

impl EvictionResult {
    /// Whether the just-appended record was itself evicted (max_size == 0).
    pub fn contains(&self, id: MessageId) -> bool {
        self.evicted.iter().any(|r| r.id == id)
    }
}

struct BufferInner {
    /// Arrival order: front = oldest, back = newest.
    retained: VecDeque<Arc<MessageRecord>>,
    summaries: HashMap<String, TopicSummary>,
    /// Retained (not ever-seen) counts, for floor-aware eviction.
    retained_per_topic: HashMap<String, usize>,
}

/// Ordered bounded buffer with per-topic summaries.
///
/// All mutation happens on the dispatcher's logical thread; readers take
/// consistent snapshots under a short read lock.
pub struct BoundedMessageBuffer {
    max_size: usize,
    floor: Option<usize>,
    inner: RwLock<BufferInner>,
}

impl BoundedMessageBuffer {
    pub fn new(config: BufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            max_size: config.max_size,
            floor: config.min_retained_per_topic,
            inner: RwLock::new(BufferInner {
                retained: VecDeque::new(),
                summaries: HashMap::new(),
                retained_per_topic: HashMap::new(),
            }),
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append a record, update its topic summary, then evict until the
    /// size invariant holds. Evicted records are returned so dependent
    /// views can trim themselves in the same logical step.
    pub fn append(&self, record: Arc<MessageRecord>) -> EvictionResult {
        let mut inner = self.inner.write();

        inner.retained.push_back(Arc::clone(&record));
        *inner
            .retained_per_topic
            .entry(record.topic.clone())
            .or_insert(0) += 1;
        match inner.summaries.get_mut(&record.topic) {
            Some(summary) => summary.observe(Arc::clone(&record)),
            None => {
                inner
                    .summaries
                    .insert(record.topic.clone(), TopicSummary::new(Arc::clone(&record)));
            }
        }

        let mut evicted = Vec::new();
        while inner.retained.len() > self.max_size {
            evicted.push(Self::evict_one(&mut inner, self.floor));
        }

        EvictionResult { evicted }
    }

    /// Remove the oldest eligible record. With a floor configured, the
    /// oldest record of a topic still above the floor goes first; when
    /// every topic is at or below the floor, plain FIFO from the head.
    fn evict_one(inner: &mut BufferInner, floor: Option<usize>) -> Arc<MessageRecord> {
        let index = match floor {
            Some(f) => inner
                .retained
                .iter()
                .position(|r| {
                    inner
                        .retained_per_topic
                        .get(&r.topic)
                        .copied()
                        .unwrap_or(0)
                        > f
                })
                .unwrap_or(0),
            None => 0,
        };

        let record = inner
            .retained
            .remove(index)
            .expect("eviction index within bounds");
        if let Some(count) = inner.retained_per_topic.get_mut(&record.topic) {
            *count -= 1;
            if *count == 0 {
                inner.retained_per_topic.remove(&record.topic);
            }
        }
        record
    }

    /// Consistent snapshot of retained records, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<MessageRecord>> {
        self.inner.read().retained.iter().cloned().collect()
    }

    /// Empty retained records and reset summary counts. The buffer itself
    /// survives and keeps accepting appends.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.retained.clear();
        inner.retained_per_topic.clear();
        for summary in inner.summaries.values_mut() {
            summary.count = 0;
        }
    }

    /// Read-only snapshot of the per-topic summaries.
    pub fn topic_summaries(&self) -> HashMap<String, TopicSummary> {
        self.inner.read().summaries.clone()
    }

    /// Messages ever seen across all topics (since the last `clear`).
    pub fn total_seen(&self) -> u64 {
        self.inner.read().summaries.values().map(|s| s.count).sum()
    }

    pub fn topic_count(&self) -> usize {
        self.inner.read().summaries.len()
    }
}

impl ViewRead for BoundedMessageBuffer {
    fn len(&self) -> usize {
        self.inner.read().retained.len()
    }

    fn get(&self, index: usize) -> Option<Arc<MessageRecord>> {
        let inner = self.inner.read();
        if index == 0 || index > inner.retained.len() {
            return None;
        }
        inner.retained.get(inner.retained.len() - index).cloned()
    }

    fn index_of(&self, id: MessageId) -> Option<usize> {
        let inner = self.inner.read();
        let len = inner.retained.len();
        inner
            .retained
            .iter()
            .position(|r| r.id == id)
            .map(|pos| len - pos)
    }
}

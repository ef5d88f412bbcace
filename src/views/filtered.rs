//! Secondary ordered lists derived from the buffer (or another view).

use super::filter::{FilterConfig, MessageFilter};
use super::ViewRead;
use crate::types::{FormatterSlot, MessageId, MessageRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a registered view.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewId(pub u64);

impl fmt::Debug for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewId({})", self.0)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a view (or cursor, or search) is derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewSource {
    /// The store's bounded buffer.
    Buffer,
    /// Another registered filtered view.
    View(ViewId),
}

struct ViewInner {
    config: FilterConfig,
    chain: Vec<Box<dyn MessageFilter>>,
    /// Arrival order: front = oldest, back = newest. Holds `Arc` handles
    /// only; the buffer owns the records.
    entries: VecDeque<Arc<MessageRecord>>,
}

impl ViewInner {
    fn passes(&mut self, record: &MessageRecord, formatted: &str) -> bool {
        self.chain.iter_mut().all(|f| f.accept(record, formatted))
    }
}

/// An ordered, derived projection of the source's records.
///
/// Chain views are extended incrementally on every source append and
/// trimmed in lock-step on every source eviction; a configuration change
/// replaces the list atomically via [`FilteredView::rebuild`]. Manual
/// views (search results) ignore source appends and are fed explicitly by
/// the search engine, but still trim on eviction.
pub struct FilteredView {
    id: ViewId,
    manual: bool,
    inner: RwLock<ViewInner>,
}

impl FilteredView {
    /// A view populated by chain evaluation of source appends.
    pub fn new(id: ViewId, config: FilterConfig) -> Self {
        let chain = config.build_chain();
        Self {
            id,
            manual: false,
            inner: RwLock::new(ViewInner {
                config,
                chain,
                entries: VecDeque::new(),
            }),
        }
    }

    /// A view populated by explicit pushes (search results). The only
    /// chain stage is the optional dedup filter.
    pub fn new_manual(id: ViewId, unique_only: bool) -> Self {
        let config = FilterConfig::default().with_unique_only(unique_only);
        let chain = config.build_chain();
        Self {
            id,
            manual: true,
            inner: RwLock::new(ViewInner {
                config,
                chain,
                entries: VecDeque::new(),
            }),
        }
    }

    pub fn id(&self) -> ViewId {
        self.id
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn config(&self) -> FilterConfig {
        self.inner.read().config.clone()
    }

    /// Re-evaluate the chain for a single newly appended source record.
    /// Returns whether the record entered this view.
    pub fn on_source_appended(&self, record: &Arc<MessageRecord>, formatted: &str) -> bool {
        if self.manual {
            return false;
        }
        self.push_newest(record, formatted)
    }

    /// Append at the newest end iff the record passes every chain stage.
    pub(crate) fn push_newest(&self, record: &Arc<MessageRecord>, formatted: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.passes(record, formatted) {
            inner.entries.push_back(Arc::clone(record));
            true
        } else {
            false
        }
    }

    /// Insert at the oldest end iff the record passes every chain stage.
    /// Used by batch search, which scans newest to oldest.
    pub(crate) fn push_oldest(&self, record: &Arc<MessageRecord>, formatted: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.passes(record, formatted) {
            inner.entries.push_front(Arc::clone(record));
            true
        } else {
            false
        }
    }

    /// Remove any of these records if present (no-op for records the
    /// chain had already excluded). Returns how many entries were removed.
    pub fn on_source_evicted(&self, evicted: &[Arc<MessageRecord>]) -> usize {
        if evicted.is_empty() {
            return 0;
        }
        let ids: HashSet<MessageId> = evicted.iter().map(|r| r.id).collect();

        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner.entries.retain(|r| !ids.contains(&r.id));
        before - inner.entries.len()
    }

    /// Replay a source snapshot (oldest first) through a fresh chain,
    /// replacing the entry list atomically. Used when the filter
    /// configuration changes; pass `None` to re-run the current one.
    ///
    /// Manual views only reset here (the engine repopulates them).
    pub fn rebuild(
        &self,
        snapshot: &[Arc<MessageRecord>],
        slot: &FormatterSlot,
        config: Option<FilterConfig>,
    ) {
        let mut inner = self.inner.write();
        if let Some(config) = config {
            inner.config = config;
        }
        inner.chain = inner.config.build_chain();
        inner.entries.clear();

        if self.manual {
            return;
        }
        // Consumers observe either the old or the new list, never a
        // partial one: the write lock spans the whole replay.
        for record in snapshot {
            let formatted = record.formatted_payload(slot);
            if inner.passes(record, &formatted) {
                inner.entries.push_back(Arc::clone(record));
            }
        }
        tracing::debug!(view = %self.id, entries = inner.entries.len(), "view rebuilt");
    }

    /// Clear entries and dedup state. Used by manual views before a new
    /// batch search, and by `clear` on the whole store.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        for filter in inner.chain.iter_mut() {
            filter.reset();
        }
    }

    /// Snapshot of the view's entries, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<MessageRecord>> {
        self.inner.read().entries.iter().cloned().collect()
    }
}

impl ViewRead for FilteredView {
    fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    fn get(&self, index: usize) -> Option<Arc<MessageRecord>> {
        let inner = self.inner.read();
        if index == 0 || index > inner.entries.len() {
            return None;
        }
        inner.entries.get(inner.entries.len() - index).cloned()
    }

    fn index_of(&self, id: MessageId) -> Option<usize> {
        let inner = self.inner.read();
        let len = inner.entries.len();
        inner
            .entries
            .iter()
            .position(|r| r.id == id)
            .map(|pos| len - pos)
    }
}

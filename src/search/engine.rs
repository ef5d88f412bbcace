//! Runs a matcher over a view's history (batch) or over newly arriving
//! records (live), populating a dedicated result view.

use super::matcher::SearchMatcher;
use crate::types::{FormatterSlot, MessageRecord};
use crate::views::{FilteredView, ViewSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Unique identifier for a search.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SearchId(pub u64);

impl fmt::Debug for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SearchId({})", self.0)
    }
}

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Search configuration, fixed at creation.
#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub matcher: SearchMatcher,

    /// Collapse repeated identical matches in the result view.
    pub unique_only: bool,

    /// Start with live search enabled.
    pub live: bool,
}

impl SearchConfig {
    pub fn new(matcher: SearchMatcher) -> Self {
        Self {
            matcher,
            unique_only: false,
            live: false,
        }
    }

    pub fn with_unique_only(mut self, unique_only: bool) -> Self {
        self.unique_only = unique_only;
        self
    }

    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }
}

/// One active search: a matcher, a source, and the result view it feeds.
pub struct SearchEngine {
    id: SearchId,
    source: ViewSource,
    matcher: SearchMatcher,
    live: AtomicBool,
    /// Matcher failure already reported for the current invocation.
    warned: AtomicBool,
    result: Arc<FilteredView>,
}

impl SearchEngine {
    pub fn new(
        id: SearchId,
        source: ViewSource,
        config: SearchConfig,
        result: Arc<FilteredView>,
    ) -> Self {
        Self {
            id,
            source,
            matcher: config.matcher,
            live: AtomicBool::new(config.live),
            warned: AtomicBool::new(false),
            result,
        }
    }

    pub fn id(&self) -> SearchId {
        self.id
    }

    pub fn source(&self) -> ViewSource {
        self.source
    }

    pub fn result_view(&self) -> &Arc<FilteredView> {
        &self.result
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Disabling stops testing new records but keeps existing results.
    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    /// Scan a source snapshot (oldest first) from newest to oldest,
    /// replacing the result view's contents. Returns the number of
    /// entries in the result view afterwards.
    pub fn run_batch(&self, snapshot: &[Arc<MessageRecord>], slot: &FormatterSlot) -> usize {
        self.result.reset();
        self.warned.store(false, Ordering::SeqCst);

        let mut matches = 0;
        for record in snapshot.iter().rev() {
            if self.matcher.exhausted() {
                break;
            }
            let formatted = record.formatted_payload(slot);
            if self.test(record, &formatted) && self.result.push_oldest(record, &formatted) {
                matches += 1;
            }
        }
        tracing::debug!(search = %self.id, matches, scanned = snapshot.len(), "batch search done");
        matches
    }

    /// Test one newly appended source record while live search is on.
    pub fn on_source_appended(&self, record: &Arc<MessageRecord>, formatted: &str) -> bool {
        if !self.is_live() {
            return false;
        }
        self.test(record, formatted) && self.result.push_newest(record, formatted)
    }

    /// Matcher failure is a non-match, warned once per invocation.
    fn test(&self, record: &MessageRecord, formatted: &str) -> bool {
        match self.matcher.matches(record, formatted) {
            Ok(matched) => matched,
            Err(e) => {
                if !self.warned.swap(true, Ordering::SeqCst) {
                    tracing::warn!(search = %self.id, error = %e, "matcher failed; treating records as non-matches");
                }
                false
            }
        }
    }
}

//! Stateless-per-call predicates applied to produce a derived view.

use crate::types::MessageRecord;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Immutable filter configuration snapshot.
///
/// A toggle is a discrete reconfigure command: changing any field means
/// rebuilding the view from a fresh chain, never patching live state.
#[derive(Clone, Debug, Default)]
pub struct FilterConfig {
    /// Suppress per-topic consecutive duplicates (by formatted content).
    pub unique_only: bool,

    /// Retain only these topics (None = all topics).
    pub topic_allow: Option<HashSet<String>>,
}

impl FilterConfig {
    pub fn unique_only() -> Self {
        Self {
            unique_only: true,
            ..Default::default()
        }
    }

    pub fn topics(topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            topic_allow: Some(topics.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn with_unique_only(mut self, unique_only: bool) -> Self {
        self.unique_only = unique_only;
        self
    }

    /// Build a fresh chain for this configuration. Chain order matters:
    /// the topic subset runs first so dedup state only ever sees records
    /// that are retained in the view.
    pub(crate) fn build_chain(&self) -> Vec<Box<dyn MessageFilter>> {
        let mut chain: Vec<Box<dyn MessageFilter>> = Vec::new();
        if let Some(allow) = &self.topic_allow {
            chain.push(Box::new(TopicSubsetFilter::new(allow.clone())));
        }
        if self.unique_only {
            chain.push(Box::new(UniqueContentFilter::new()));
        }
        chain
    }
}

/// One stage of a view's filter chain.
///
/// `accept` may keep per-view state (e.g. dedup hashes); that state is
/// rebuilt from scratch whenever the configuration changes.
pub trait MessageFilter: Send + Sync {
    fn accept(&mut self, record: &MessageRecord, formatted: &str) -> bool;

    /// Drop any accumulated per-view state.
    fn reset(&mut self);
}

/// Suppresses a record whose formatted payload equals the immediately
/// preceding retained-in-this-view record for the same topic.
pub struct UniqueContentFilter {
    /// Topic -> content hash of the last record accepted for it.
    last_accepted: HashMap<String, [u8; 32]>,
}

impl UniqueContentFilter {
    pub fn new() -> Self {
        Self {
            last_accepted: HashMap::new(),
        }
    }

    fn content_hash(formatted: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(formatted.as_bytes());
        hasher.finalize().into()
    }
}

impl Default for UniqueContentFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageFilter for UniqueContentFilter {
    fn accept(&mut self, record: &MessageRecord, formatted: &str) -> bool {
        let hash = Self::content_hash(formatted);
        match self.last_accepted.get(&record.topic) {
            Some(previous) if *previous == hash => false,
            _ => {
                self.last_accepted.insert(record.topic.clone(), hash);
                true
            }
        }
    }

    fn reset(&mut self) {
        self.last_accepted.clear();
    }
}

/// Retains only records whose topic is in the allow-set.
pub struct TopicSubsetFilter {
    allow: HashSet<String>,
}

impl TopicSubsetFilter {
    pub fn new(allow: HashSet<String>) -> Self {
        Self { allow }
    }
}

impl MessageFilter for TopicSubsetFilter {
    fn accept(&mut self, record: &MessageRecord, _formatted: &str) -> bool {
        self.allow.contains(&record.topic)
    }

    fn reset(&mut self) {}
}

//! Batch and live search over a view's history.

mod engine;
mod matcher;

pub use engine::{SearchConfig, SearchEngine, SearchId};
pub use matcher::{MatcherError, ScriptPredicate, SearchMatcher};

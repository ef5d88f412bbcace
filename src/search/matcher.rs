//! Pluggable match strategies.

use crate::types::MessageRecord;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a host-supplied predicate.
///
/// Aborts only the current match test; the engine treats the record as a
/// non-match and surfaces the failure once per search invocation.
#[derive(Debug, Clone, Error)]
#[error("matcher {matcher} failed: {message}")]
pub struct MatcherError {
    pub matcher: String,
    pub message: String,
}

/// Opaque host-supplied predicate over one record. Execution and
/// sandboxing are the host's responsibility.
pub type ScriptPredicate = Arc<dyn Fn(&MessageRecord) -> Result<bool, String> + Send + Sync>;

/// How a search decides whether a record is a match.
///
/// A single `matches` capability; the variant is selected at
/// construction time and the engine never inspects it.
#[derive(Clone)]
pub enum SearchMatcher {
    /// Substring test against the formatted payload.
    PlainText {
        needle: String,
        case_sensitive: bool,
    },
    /// Delegates to a named host predicate.
    NamedScript {
        name: String,
        predicate: ScriptPredicate,
    },
    /// Delegates to an ad-hoc host predicate supplied as source text.
    InlineExpression {
        source: String,
        predicate: ScriptPredicate,
    },
}

impl SearchMatcher {
    pub fn plain_text(needle: impl Into<String>, case_sensitive: bool) -> Self {
        Self::PlainText {
            needle: needle.into(),
            case_sensitive,
        }
    }

    pub fn named_script(name: impl Into<String>, predicate: ScriptPredicate) -> Self {
        Self::NamedScript {
            name: name.into(),
            predicate,
        }
    }

    pub fn inline_expression(source: impl Into<String>, predicate: ScriptPredicate) -> Self {
        Self::InlineExpression {
            source: source.into(),
            predicate,
        }
    }

    /// Test one record. `formatted` is the record's payload under the
    /// store's current formatter.
    pub fn matches(&self, record: &MessageRecord, formatted: &str) -> Result<bool, MatcherError> {
        match self {
            Self::PlainText {
                needle,
                case_sensitive,
            } => {
                if *case_sensitive {
                    Ok(formatted.contains(needle.as_str()))
                } else {
                    // Normalize here, not at construction, so a variant
                    // built directly behaves the same as the constructor.
                    Ok(formatted
                        .to_lowercase()
                        .contains(&needle.to_lowercase()))
                }
            }
            Self::NamedScript { name, predicate } => {
                predicate(record).map_err(|message| MatcherError {
                    matcher: format!("script '{name}'"),
                    message,
                })
            }
            Self::InlineExpression { predicate, .. } => {
                predicate(record).map_err(|message| MatcherError {
                    matcher: "inline expression".to_string(),
                    message,
                })
            }
        }
    }

    /// Whether the matcher is permanently unsatisfiable for all records
    /// older than the ones already tested. An optimization hook for batch
    /// scans; none of the built-in matchers ever declares it.
    pub fn exhausted(&self) -> bool {
        false
    }
}

impl fmt::Debug for SearchMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlainText {
                needle,
                case_sensitive,
            } => f
                .debug_struct("PlainText")
                .field("needle", needle)
                .field("case_sensitive", case_sensitive)
                .finish(),
            Self::NamedScript { name, .. } => {
                f.debug_struct("NamedScript").field("name", name).finish()
            }
            Self::InlineExpression { source, .. } => f
                .debug_struct("InlineExpression")
                .field("source", source)
                .finish(),
        }
    }
}

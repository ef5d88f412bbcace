//! Error types for the message store.

use crate::cursor::CursorId;
use crate::search::SearchId;
use crate::views::ViewId;
use thiserror::Error;

/// Main error type for store operations.
///
/// Capacity eviction is normal behavior and deliberately absent here;
/// formatter and matcher failures are scoped to a single record or search
/// pass and surface as sentinels/warnings rather than errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store is closed")]
    Closed,

    #[error("View not found: {0}")]
    ViewNotFound(ViewId),

    #[error("Cursor not found: {0}")]
    CursorNotFound(CursorId),

    #[error("Search not found: {0}")]
    SearchNotFound(SearchId),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

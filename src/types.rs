//! Core types for the message store.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique, monotonically increasing identifier for a received message.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Sentinel formatted payload used when the host formatter fails.
///
/// The raw payload stays intact, so a later formatter change can still
/// render the message.
pub const UNFORMATTABLE: &str = "[unformattable]";

/// Error returned by a payload formatter.
#[derive(Debug, Clone, thiserror::Error)]
#[error("formatter failed: {0}")]
pub struct FormatError(pub String);

type FormatFn = dyn Fn(&[u8]) -> Result<String, FormatError> + Send + Sync;

/// A named payload formatter supplied by the host.
///
/// The store calls the formatter opaquely and memoizes its output per
/// record; it has no knowledge of how the rendering is computed.
#[derive(Clone)]
pub struct Formatter {
    name: String,
    func: Arc<FormatFn>,
}

impl Formatter {
    /// Wrap a host-supplied formatting function.
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&[u8]) -> Result<String, FormatError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Lossy UTF-8 rendering. The default.
    pub fn utf8_lossy() -> Self {
        Self::new("utf8-lossy", |raw| {
            Ok(String::from_utf8_lossy(raw).into_owned())
        })
    }

    /// Pretty-printed JSON rendering. Fails on non-JSON payloads.
    pub fn json_pretty() -> Self {
        Self::new("json-pretty", |raw| {
            let value: serde_json::Value =
                serde_json::from_slice(raw).map_err(|e| FormatError(e.to_string()))?;
            serde_json::to_string_pretty(&value).map_err(|e| FormatError(e.to_string()))
        })
    }

    /// Formatter name (for display and diagnostics).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render a raw payload.
    pub fn render(&self, raw: &[u8]) -> Result<String, FormatError> {
        (self.func)(raw)
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::utf8_lossy()
    }
}

impl fmt::Debug for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Formatter({})", self.name)
    }
}

/// Holds the currently active formatter plus an epoch counter.
///
/// Swapping the formatter bumps the epoch, which invalidates every
/// record's memoized formatted payload without touching the records.
pub struct FormatterSlot {
    current: RwLock<Formatter>,
    epoch: AtomicU64,
}

impl FormatterSlot {
    pub fn new(formatter: Formatter) -> Self {
        Self {
            current: RwLock::new(formatter),
            epoch: AtomicU64::new(0),
        }
    }

    /// Replace the active formatter and invalidate memoized renderings.
    pub fn set(&self, formatter: Formatter) {
        *self.current.write() = formatter;
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Formatter {
        self.current.read().clone()
    }
}

impl Default for FormatterSlot {
    fn default() -> Self {
        Self::new(Formatter::default())
    }
}

/// One decoded inbound message, as handed over by the connectivity layer.
///
/// The dispatcher assigns the id and a receive timestamp (when none is
/// supplied) at ingestion time.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: Option<Timestamp>,
    pub subscription_tag: Option<String>,
}

impl IncomingMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            timestamp: None,
            subscription_tag: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.subscription_tag = Some(tag.into());
        self
    }
}

/// A single retained message.
///
/// Immutable after construction, except for the memoized formatted
/// payload. Formatting is idempotent for a given formatter epoch, so a
/// benign race that renders the same payload twice is acceptable.
#[derive(Debug)]
pub struct MessageRecord {
    /// Unique identifier (assigned by the dispatcher).
    pub id: MessageId,

    /// Topic the message arrived on.
    pub topic: String,

    /// Raw payload as received.
    pub raw_payload: Vec<u8>,

    /// Receive time.
    pub timestamp: Timestamp,

    /// Which host-side subscription produced this message, if any.
    pub subscription_tag: Option<String>,

    /// Memoized (formatter epoch, rendered payload).
    formatted: RwLock<Option<(u64, Arc<str>)>>,
}

impl MessageRecord {
    pub fn new(id: MessageId, message: IncomingMessage) -> Self {
        Self {
            id,
            topic: message.topic,
            raw_payload: message.payload,
            timestamp: message.timestamp.unwrap_or_else(Timestamp::now),
            subscription_tag: message.subscription_tag,
            formatted: RwLock::new(None),
        }
    }

    /// Formatted payload under the slot's current formatter.
    ///
    /// Computed at most once per formatter epoch; a formatter failure
    /// yields [`UNFORMATTABLE`] and does not stop ingestion.
    pub fn formatted_payload(&self, slot: &FormatterSlot) -> Arc<str> {
        let epoch = slot.epoch();
        if let Some((cached_epoch, rendered)) = self.formatted.read().as_ref() {
            if *cached_epoch == epoch {
                return Arc::clone(rendered);
            }
        }

        let rendered: Arc<str> = match slot.current().render(&self.raw_payload) {
            Ok(s) => s.into(),
            Err(e) => {
                tracing::debug!(id = %self.id, topic = %self.topic, error = %e, "payload not formattable");
                UNFORMATTABLE.into()
            }
        };
        *self.formatted.write() = Some((epoch, Arc::clone(&rendered)));
        rendered
    }
}

//! Main MessageStore struct tying all components together.

use crate::buffer::{BoundedMessageBuffer, BufferConfig, TopicSummary};
use crate::cursor::{CursorEvent, CursorId, EventOrigin, NavigationCursor};
use crate::dispatch::{self, ControlOp, DispatchOp};
use crate::error::{Result, StoreError};
use crate::search::{SearchConfig, SearchEngine, SearchId};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager};
use crate::types::{Formatter, FormatterSlot, IncomingMessage, MessageRecord};
use crate::views::{FilterConfig, FilteredView, ViewId, ViewRead, ViewSource};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Maximum retained records in the buffer.
    pub max_size: usize,

    /// Optional per-topic eviction floor (see [`BufferConfig`]).
    pub min_retained_per_topic: Option<usize>,

    /// Force a notification flush after this many appends.
    pub max_batch: usize,

    /// Shed per-record summaries from a pending batch past this many
    /// appends; totals are still delivered.
    pub coalesce_threshold: usize,

    /// Initial payload formatter.
    pub formatter: Formatter,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_size: 5000,
            min_retained_per_topic: None,
            max_batch: 1024,
            coalesce_threshold: 256,
            formatter: Formatter::default(),
        }
    }
}

impl StoreConfig {
    fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            max_size: self.max_size,
            min_retained_per_topic: self.min_retained_per_topic,
        }
    }

    fn validate(&self) -> Result<()> {
        self.buffer_config().validate()?;
        if self.max_batch == 0 {
            return Err(StoreError::InvalidConfig(
                "max_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub retained: usize,
    pub topics: usize,
    /// Messages ever accepted (since the last clear).
    pub total_seen: u64,
    /// Submissions rejected after close, in aggregate.
    pub rejected_submissions: u64,
    pub views: usize,
    pub cursors: usize,
    pub searches: usize,
    pub subscriptions: usize,
}

/// A view plus what it derives from.
pub(crate) struct RegisteredView {
    pub(crate) view: Arc<FilteredView>,
    pub(crate) source: ViewSource,
}

/// State shared between the host-facing API and the dispatcher loop.
pub(crate) struct Shared {
    pub(crate) config: StoreConfig,
    pub(crate) buffer: BoundedMessageBuffer,
    /// Registered views in registration order (ascending id).
    pub(crate) views: RwLock<BTreeMap<ViewId, RegisteredView>>,
    pub(crate) cursors: RwLock<BTreeMap<CursorId, Arc<NavigationCursor>>>,
    pub(crate) searches: RwLock<BTreeMap<SearchId, Arc<SearchEngine>>>,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) formatter: FormatterSlot,
    pub(crate) next_message_id: AtomicU64,
    pub(crate) closed: AtomicBool,
    pub(crate) rejected_submissions: AtomicU64,
}

impl Shared {
    pub(crate) fn view(&self, id: ViewId) -> Option<Arc<FilteredView>> {
        self.views.read().get(&id).map(|rv| Arc::clone(&rv.view))
    }

    pub(crate) fn source_snapshot(&self, source: ViewSource) -> Option<Vec<Arc<MessageRecord>>> {
        match source {
            ViewSource::Buffer => Some(self.buffer.snapshot()),
            ViewSource::View(id) => self.view(id).map(|v| v.snapshot()),
        }
    }

    /// Run a closure against the read side of a view source.
    pub(crate) fn with_target<R>(
        &self,
        target: ViewSource,
        f: impl FnOnce(&dyn ViewRead) -> R,
    ) -> Option<R> {
        match target {
            ViewSource::Buffer => Some(f(&self.buffer)),
            ViewSource::View(id) => self.view(id).map(|view| f(view.as_ref())),
        }
    }
}

/// The message store: bounded buffer, derived views, cursors, search,
/// and the ingestion dispatcher.
///
/// Producers call [`MessageStore::submit`] from any thread; everything
/// that mutates the buffer or a view runs on the store's single
/// dispatcher thread. Readers take consistent snapshots.
pub struct MessageStore {
    shared: Arc<Shared>,
    ops: Sender<DispatchOp>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    next_handle_id: AtomicU64,
}

impl MessageStore {
    /// Create a store and start its dispatcher loop.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let buffer = BoundedMessageBuffer::new(config.buffer_config())?;
        let formatter = FormatterSlot::new(config.formatter.clone());

        let shared = Arc::new(Shared {
            config,
            buffer,
            views: RwLock::new(BTreeMap::new()),
            cursors: RwLock::new(BTreeMap::new()),
            searches: RwLock::new(BTreeMap::new()),
            subscriptions: SubscriptionManager::new(),
            formatter,
            next_message_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            rejected_submissions: AtomicU64::new(0),
        });

        let (ops, receiver) = unbounded();
        let loop_shared = Arc::clone(&shared);
        let dispatcher = std::thread::Builder::new()
            .name("spyglass-dispatch".to_string())
            .spawn(move || dispatch::run(loop_shared, receiver))?;

        Ok(Self {
            shared,
            ops,
            dispatcher: Mutex::new(Some(dispatcher)),
            next_handle_id: AtomicU64::new(1),
        })
    }

    // --- Ingestion ---

    /// Submit a decoded message from a producer thread. Never blocks.
    ///
    /// After [`MessageStore::close`] this returns [`StoreError::Closed`];
    /// the message is dropped and counted.
    pub fn submit(&self, message: IncomingMessage) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.rejected_submissions.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Closed);
        }
        self.ops.send(DispatchOp::Submit(message)).map_err(|_| {
            self.shared.rejected_submissions.fetch_add(1, Ordering::SeqCst);
            StoreError::Closed
        })
    }

    /// Wait until every previously queued submission and control
    /// operation has been processed and its notifications flushed.
    pub fn sync(&self) -> Result<()> {
        let (ack, done) = bounded(1);
        self.ops
            .send(DispatchOp::Sync(ack))
            .map_err(|_| StoreError::Closed)?;
        done.recv().map_err(|_| StoreError::Closed)
    }

    // --- Buffer reads ---

    /// Consistent snapshot of retained records, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<MessageRecord>> {
        self.shared.buffer.snapshot()
    }

    pub fn len(&self) -> usize {
        self.shared.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.buffer.is_empty()
    }

    /// Record at a 1-based navigation index (1 = newest).
    pub fn get(&self, index: usize) -> Option<Arc<MessageRecord>> {
        self.shared.buffer.get(index)
    }

    pub fn topic_summaries(&self) -> HashMap<String, TopicSummary> {
        self.shared.buffer.topic_summaries()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            retained: self.shared.buffer.len(),
            topics: self.shared.buffer.topic_count(),
            total_seen: self.shared.buffer.total_seen(),
            rejected_submissions: self.shared.rejected_submissions.load(Ordering::SeqCst),
            views: self.shared.views.read().len(),
            cursors: self.shared.cursors.read().len(),
            searches: self.shared.searches.read().len(),
            subscriptions: self.shared.subscriptions.subscription_count(),
        }
    }

    /// Empty the buffer, reset summaries, and reset every view.
    pub fn clear(&self) -> Result<()> {
        self.control(ControlOp::Clear)
    }

    // --- Formatter ---

    /// Swap the payload formatter. Memoized renderings are invalidated
    /// and dedup views are rebuilt on the dispatcher thread.
    pub fn set_formatter(&self, formatter: Formatter) -> Result<()> {
        self.control(ControlOp::SetFormatter(formatter))
    }

    pub fn formatter(&self) -> Formatter {
        self.shared.formatter.current()
    }

    // --- Views ---

    /// Register a filtered view over the buffer or another view. The
    /// view is seeded from its source's current contents on the
    /// dispatcher thread; call [`MessageStore::sync`] to wait for that.
    pub fn create_view(&self, config: FilterConfig, source: ViewSource) -> Result<ViewId> {
        let id = ViewId(self.next_handle());
        let view = Arc::new(FilteredView::new(id, config));
        self.control(ControlOp::RegisterView { view, source })?;
        Ok(id)
    }

    /// Replace a view's filter configuration; the view is rebuilt
    /// atomically from its source snapshot.
    pub fn reconfigure_view(&self, view: ViewId, config: FilterConfig) -> Result<()> {
        self.control(ControlOp::ReconfigureView { view, config })
    }

    /// Detach a view, every view derived from it, and its cursors.
    /// Idempotent.
    pub fn drop_view(&self, view: ViewId) -> Result<()> {
        self.control(ControlOp::DropView { view })
    }

    /// Read handle for a registered view.
    pub fn view(&self, id: ViewId) -> Result<Arc<FilteredView>> {
        self.shared.view(id).ok_or(StoreError::ViewNotFound(id))
    }

    // --- Cursors ---

    /// Create a cursor bound to a view (or the buffer). Starts with no
    /// selection, pinned to latest.
    pub fn create_cursor(&self, target: ViewSource) -> CursorId {
        let id = CursorId(self.next_handle());
        let cursor = Arc::new(NavigationCursor::new(id, target));
        cursor.set_pin_latest(true);
        self.shared.cursors.write().insert(id, cursor);
        id
    }

    /// Remove a cursor. Idempotent.
    pub fn drop_cursor(&self, id: CursorId) {
        self.shared.cursors.write().remove(&id);
    }

    pub fn cursor_position(&self, id: CursorId) -> Result<usize> {
        Ok(self.cursor(id)?.position())
    }

    /// Record currently under the cursor, if any.
    pub fn cursor_record(&self, id: CursorId) -> Result<Option<Arc<MessageRecord>>> {
        let cursor = self.cursor(id)?;
        let position = cursor.position();
        if position == 0 {
            return Ok(None);
        }
        self.shared
            .with_target(cursor.target(), |view| view.get(position))
            .ok_or_else(|| self.missing_target(cursor.target()))
    }

    /// Pin/unpin follow-latest mode.
    pub fn set_cursor_pinned(&self, id: CursorId, pinned: bool) -> Result<()> {
        self.cursor(id)?.set_pin_latest(pinned);
        Ok(())
    }

    /// Jump to the newest record.
    pub fn cursor_first(&self, id: CursorId) -> Result<usize> {
        self.cursor_op(id, |cursor, view| cursor.first(view))
    }

    /// Jump to the oldest record.
    pub fn cursor_last(&self, id: CursorId, origin: Option<EventOrigin>) -> Result<usize> {
        self.cursor_op(id, |cursor, view| cursor.last(view, origin))
    }

    /// Step by a signed delta, clamped at both ends.
    pub fn cursor_step(&self, id: CursorId, delta: i64, origin: Option<EventOrigin>) -> Result<usize> {
        self.cursor_op(id, |cursor, view| cursor.step(view, delta, origin))
    }

    /// Absolute positioning, clamped into `[1, len]`.
    pub fn cursor_set_position(
        &self,
        id: CursorId,
        position: usize,
        origin: Option<EventOrigin>,
    ) -> Result<usize> {
        self.cursor_op(id, |cursor, view| cursor.set_position(view, position, origin))
    }

    fn cursor(&self, id: CursorId) -> Result<Arc<NavigationCursor>> {
        self.shared
            .cursors
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::CursorNotFound(id))
    }

    fn cursor_op(
        &self,
        id: CursorId,
        f: impl FnOnce(&NavigationCursor, &dyn ViewRead) -> Vec<CursorEvent>,
    ) -> Result<usize> {
        let cursor = self.cursor(id)?;
        let events = self
            .shared
            .with_target(cursor.target(), |view| f(&cursor, view))
            .ok_or_else(|| self.missing_target(cursor.target()))?;
        for event in events {
            self.shared.subscriptions.broadcast_cursor(event);
        }
        Ok(cursor.position())
    }

    fn missing_target(&self, target: ViewSource) -> StoreError {
        match target {
            ViewSource::Buffer => StoreError::Closed,
            ViewSource::View(id) => StoreError::ViewNotFound(id),
        }
    }

    // --- Search ---

    /// Register a search over the buffer or a view. The result view is a
    /// manual [`FilteredView`] fed by the engine.
    pub fn create_search(&self, config: SearchConfig, source: ViewSource) -> Result<SearchId> {
        let id = SearchId(self.next_handle());
        let result = Arc::new(FilteredView::new_manual(
            ViewId(self.next_handle()),
            config.unique_only,
        ));
        let engine = Arc::new(SearchEngine::new(id, source, config, result));
        self.control(ControlOp::RegisterSearch { engine })?;
        Ok(id)
    }

    /// Scan the source's history newest-to-oldest, replacing previous
    /// results. Completion is announced via `StoreEvent::SearchCompleted`.
    pub fn run_batch_search(&self, search: SearchId) -> Result<()> {
        self.control(ControlOp::RunBatchSearch { search })
    }

    /// Toggle live search. Disabling keeps existing results.
    pub fn set_search_live(&self, search: SearchId, live: bool) -> Result<()> {
        self.control(ControlOp::SetSearchLive { search, live })
    }

    /// Read handle for a search's result view (newest match at index 1).
    pub fn search_results(&self, search: SearchId) -> Result<Arc<FilteredView>> {
        self.shared
            .searches
            .read()
            .get(&search)
            .map(|engine| Arc::clone(engine.result_view()))
            .ok_or(StoreError::SearchNotFound(search))
    }

    /// Remove a search and its result view. Idempotent.
    pub fn drop_search(&self, search: SearchId) -> Result<()> {
        self.control(ControlOp::DropSearch { search })
    }

    // --- Subscriptions ---

    /// Subscribe to batched append/evict events and cursor events.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.shared.subscriptions.subscribe(config)
    }

    /// Unsubscribe. Idempotent, safe from within an event consumer.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared.subscriptions.unsubscribe(id);
    }

    // --- Lifecycle ---

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Tear down: reject further submissions, finish in-flight appends,
    /// stop the dispatcher, and release all registrations.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.ops.send(DispatchOp::Shutdown);
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }

        let rejected = self.shared.rejected_submissions.load(Ordering::SeqCst);
        if rejected > 0 {
            tracing::debug!(rejected, "submissions rejected after close");
        }

        self.shared.subscriptions.close();
        self.shared.views.write().clear();
        self.shared.cursors.write().clear();
        self.shared.searches.write().clear();
        tracing::debug!("store closed");
    }

    fn control(&self, op: ControlOp) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.ops
            .send(DispatchOp::Control(op))
            .map_err(|_| StoreError::Closed)
    }

    fn next_handle(&self) -> u64 {
        self.next_handle_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        self.close();
    }
}

//! The ingestion pipeline: one dispatcher loop per store.
//!
//! Producers push decoded messages into an unbounded submission queue;
//! the loop drains it, appends to the buffer, propagates appends and
//! evictions to every registered view and cursor in registration order,
//! and flushes batched notifications to subscribers. Control operations
//! (filter rebuilds, search toggles, formatter swaps) run on the same
//! loop so they can never race an append.

use crate::cursor::NavigationCursor;
use crate::search::{SearchEngine, SearchId};
use crate::store::{RegisteredView, Shared};
use crate::subscriptions::{MessageSummary, StoreEvent};
use crate::types::{Formatter, IncomingMessage, MessageId, MessageRecord};
use crate::views::{FilterConfig, FilteredView, ViewId, ViewSource};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) enum DispatchOp {
    Submit(IncomingMessage),
    Control(ControlOp),
    /// Acknowledge once every previously queued op has been processed.
    Sync(Sender<()>),
    Shutdown,
}

pub(crate) enum ControlOp {
    RegisterView {
        view: Arc<FilteredView>,
        source: ViewSource,
    },
    DropView {
        view: ViewId,
    },
    ReconfigureView {
        view: ViewId,
        config: FilterConfig,
    },
    RegisterSearch {
        engine: Arc<SearchEngine>,
    },
    DropSearch {
        search: SearchId,
    },
    SetSearchLive {
        search: SearchId,
        live: bool,
    },
    RunBatchSearch {
        search: SearchId,
    },
    SetFormatter(Formatter),
    Clear,
}

/// Accumulated notifications awaiting delivery. Past the coalesce
/// threshold only the totals are carried, so a burst cannot grow the
/// batch without bound.
#[derive(Default)]
struct PendingBatch {
    appended: Vec<MessageSummary>,
    evicted: Vec<MessageId>,
    total_appended: usize,
    total_evicted: usize,
    coalesced: bool,
}

impl PendingBatch {
    fn record(&mut self, shared: &Shared, record: &MessageRecord, evicted: &[Arc<MessageRecord>]) {
        self.total_appended += 1;
        self.total_evicted += evicted.len();

        if !self.coalesced && self.total_appended > shared.config.coalesce_threshold {
            self.appended.clear();
            self.evicted.clear();
            self.coalesced = true;
        }
        if !self.coalesced {
            let threshold = shared.subscriptions.summary_threshold();
            self.appended
                .push(MessageSummary::from_record(record, &shared.formatter, threshold));
            self.evicted.extend(evicted.iter().map(|r| r.id));
        }
    }

    fn flush(&mut self, shared: &Shared) {
        if self.total_appended == 0 && self.total_evicted == 0 {
            return;
        }
        let event = StoreEvent::Batch {
            appended: std::mem::take(&mut self.appended),
            evicted: std::mem::take(&mut self.evicted),
            total_appended: self.total_appended,
            total_evicted: self.total_evicted,
            coalesced: self.coalesced,
        };
        shared.subscriptions.broadcast_batch(event);
        self.total_appended = 0;
        self.total_evicted = 0;
        self.coalesced = false;
    }
}

/// Dispatcher loop. Blocks only on an empty submission queue; a batch is
/// flushed when the queue drains or the batch cap is reached.
pub(crate) fn run(shared: Arc<Shared>, ops: Receiver<DispatchOp>) {
    tracing::debug!("dispatcher started");
    let mut batch = PendingBatch::default();

    'outer: loop {
        let op = match ops.recv() {
            Ok(op) => op,
            Err(_) => break,
        };
        if !handle_op(&shared, &mut batch, op) {
            break;
        }

        loop {
            if batch.total_appended >= shared.config.max_batch {
                batch.flush(&shared);
            }
            match ops.try_recv() {
                Ok(op) => {
                    if !handle_op(&shared, &mut batch, op) {
                        break 'outer;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'outer,
            }
        }
        batch.flush(&shared);
    }

    batch.flush(&shared);
    tracing::debug!("dispatcher stopped");
}

/// Returns false when the loop should stop.
fn handle_op(shared: &Shared, batch: &mut PendingBatch, op: DispatchOp) -> bool {
    match op {
        DispatchOp::Submit(message) => {
            ingest(shared, batch, message);
            true
        }
        DispatchOp::Control(ctrl) => {
            // Keep event ordering: deliver pending appends before the
            // effects of the control operation become visible.
            batch.flush(shared);
            control(shared, ctrl);
            true
        }
        DispatchOp::Sync(ack) => {
            batch.flush(shared);
            let _ = ack.send(());
            true
        }
        DispatchOp::Shutdown => false,
    }
}

fn ingest(shared: &Shared, batch: &mut PendingBatch, message: IncomingMessage) {
    let id = MessageId(shared.next_message_id.fetch_add(1, Ordering::SeqCst));
    let record = Arc::new(MessageRecord::new(id, message));
    let formatted = record.formatted_payload(&shared.formatter);

    let result = shared.buffer.append(Arc::clone(&record));

    // Registration order (ascending id) keeps propagation deterministic.
    let views: Vec<(ViewId, Arc<FilteredView>, ViewSource)> = shared
        .views
        .read()
        .iter()
        .map(|(vid, rv)| (*vid, Arc::clone(&rv.view), rv.source))
        .collect();

    // A search result view gains the record through its live engine, so
    // the engine runs in the result view's slot of the ordered pass below.
    let engines: Vec<Arc<SearchEngine>> = shared.searches.read().values().cloned().collect();
    let engine_for_result: HashMap<ViewId, &Arc<SearchEngine>> = engines
        .iter()
        .map(|engine| (engine.result_view().id(), engine))
        .collect();

    // Which views accepted the record; a view sourced from another view
    // only sees it if the parent accepted it first. A view's id is always
    // greater than its source's, so ascending-id order visits parents
    // first and chain views over search results extend in the same step.
    let mut accepted: HashMap<ViewId, bool> = HashMap::new();
    for (vid, view, source) in &views {
        let upstream = match source {
            ViewSource::Buffer => true,
            ViewSource::View(parent) => accepted.get(parent).copied().unwrap_or(false),
        };
        let ok = upstream
            && match engine_for_result.get(vid) {
                Some(engine) => engine.on_source_appended(&record, &formatted),
                None => view.on_source_appended(&record, &formatted),
            };
        accepted.insert(*vid, ok);
    }

    // Evictions propagate to every view in the same step; no view may
    // keep an evicted record live.
    let mut trimmed: HashMap<ViewId, usize> = HashMap::new();
    if !result.evicted.is_empty() {
        for (vid, view, _) in &views {
            trimmed.insert(*vid, view.on_source_evicted(&result.evicted));
        }
    }

    // Cursors react last, once their view's new shape is final.
    let cursors: Vec<Arc<NavigationCursor>> = shared.cursors.read().values().cloned().collect();
    for cursor in &cursors {
        let target = cursor.target();
        let appended_here = match target {
            ViewSource::Buffer => true,
            ViewSource::View(vid) => accepted.get(&vid).copied().unwrap_or(false),
        };
        let trimmed_here = match target {
            ViewSource::Buffer => !result.evicted.is_empty(),
            ViewSource::View(vid) => trimmed.get(&vid).copied().unwrap_or(0) > 0,
        };
        if !appended_here && !trimmed_here {
            continue;
        }
        let events = shared.with_target(target, |view| {
            let mut events = Vec::new();
            if appended_here {
                events.extend(cursor.on_source_appended(view));
            }
            if trimmed_here {
                events.extend(cursor.on_view_trimmed(view));
            }
            events
        });
        for event in events.into_iter().flatten() {
            shared.subscriptions.broadcast_cursor(event);
        }
    }

    batch.record(shared, &record, &result.evicted);
}

fn control(shared: &Shared, op: ControlOp) {
    match op {
        ControlOp::RegisterView { view, source } => {
            // Seed chain views from the source's current contents before
            // they become visible to the append path.
            if !view.is_manual() {
                if let Some(snapshot) = shared.source_snapshot(source) {
                    view.rebuild(&snapshot, &shared.formatter, None);
                }
            }
            let id = view.id();
            shared
                .views
                .write()
                .insert(id, RegisteredView { view, source });
            tracing::debug!(view = %id, "view registered");
        }
        ControlOp::DropView { view } => drop_view_cascade(shared, view),
        ControlOp::ReconfigureView { view, config } => rebuild_view(shared, view, Some(config)),
        ControlOp::RegisterSearch { engine } => {
            let result = Arc::clone(engine.result_view());
            shared.views.write().insert(
                result.id(),
                RegisteredView {
                    view: result,
                    source: engine.source(),
                },
            );
            let id = engine.id();
            shared.searches.write().insert(id, engine);
            tracing::debug!(search = %id, "search registered");
        }
        ControlOp::DropSearch { search } => {
            let engine = shared.searches.write().remove(&search);
            if let Some(engine) = engine {
                drop_view_cascade(shared, engine.result_view().id());
            }
        }
        ControlOp::SetSearchLive { search, live } => {
            if let Some(engine) = shared.searches.read().get(&search) {
                engine.set_live(live);
            }
        }
        ControlOp::RunBatchSearch { search } => {
            let engine = shared.searches.read().get(&search).cloned();
            if let Some(engine) = engine {
                if let Some(snapshot) = shared.source_snapshot(engine.source()) {
                    let matches = engine.run_batch(&snapshot, &shared.formatter);
                    notify_view_trimmed(shared, engine.result_view().id());
                    shared
                        .subscriptions
                        .broadcast_search_completed(StoreEvent::SearchCompleted { search, matches });
                }
            }
        }
        ControlOp::SetFormatter(formatter) => {
            tracing::debug!(formatter = formatter.name(), "formatter changed");
            shared.formatter.set(formatter);
            // Dedup decisions depend on formatted content, so every chain
            // view sourced from the buffer is rebuilt; search results keep
            // their matches.
            let roots: Vec<ViewId> = shared
                .views
                .read()
                .iter()
                .filter(|(_, rv)| rv.source == ViewSource::Buffer && !rv.view.is_manual())
                .map(|(vid, _)| *vid)
                .collect();
            for id in roots {
                rebuild_view(shared, id, None);
            }
        }
        ControlOp::Clear => {
            shared.buffer.clear();
            let views: Vec<Arc<FilteredView>> = shared
                .views
                .read()
                .values()
                .map(|rv| Arc::clone(&rv.view))
                .collect();
            for view in &views {
                view.reset();
            }
            let cursors: Vec<Arc<NavigationCursor>> =
                shared.cursors.read().values().cloned().collect();
            for cursor in &cursors {
                let events = shared.with_target(cursor.target(), |view| cursor.on_view_trimmed(view));
                for event in events.into_iter().flatten() {
                    shared.subscriptions.broadcast_cursor(event);
                }
            }
            shared.subscriptions.broadcast_cleared();
            tracing::debug!("store cleared");
        }
    }
}

/// Rebuild a view from its source snapshot, cascade to chain views that
/// derive from it, then let its cursors re-anchor.
fn rebuild_view(shared: &Shared, id: ViewId, config: Option<FilterConfig>) {
    let entry = shared
        .views
        .read()
        .get(&id)
        .map(|rv| (Arc::clone(&rv.view), rv.source));
    let Some((view, source)) = entry else { return };
    let Some(snapshot) = shared.source_snapshot(source) else {
        return;
    };
    view.rebuild(&snapshot, &shared.formatter, config);

    let children: Vec<ViewId> = shared
        .views
        .read()
        .iter()
        .filter(|(_, rv)| rv.source == ViewSource::View(id) && !rv.view.is_manual())
        .map(|(child, _)| *child)
        .collect();
    for child in children {
        rebuild_view(shared, child, None);
    }

    notify_view_trimmed(shared, id);
}

/// Re-anchor cursors on a view whose contents changed wholesale.
fn notify_view_trimmed(shared: &Shared, id: ViewId) {
    let cursors: Vec<Arc<NavigationCursor>> = shared.cursors.read().values().cloned().collect();
    for cursor in cursors {
        if cursor.target() != ViewSource::View(id) {
            continue;
        }
        let events = shared.with_target(cursor.target(), |view| cursor.on_view_trimmed(view));
        for event in events.into_iter().flatten() {
            shared.subscriptions.broadcast_cursor(event);
        }
    }
}

/// Remove a view together with everything derived from it: cursors bound
/// to it, chain views sourced from it, and searches scanning it.
fn drop_view_cascade(shared: &Shared, id: ViewId) {
    if shared.views.write().remove(&id).is_none() {
        return;
    }
    shared
        .cursors
        .write()
        .retain(|_, cursor| cursor.target() != ViewSource::View(id));

    let searches: Vec<(SearchId, ViewId)> = shared
        .searches
        .read()
        .iter()
        .filter(|(_, engine)| engine.source() == ViewSource::View(id))
        .map(|(sid, engine)| (*sid, engine.result_view().id()))
        .collect();
    for (sid, result_view) in searches {
        shared.searches.write().remove(&sid);
        drop_view_cascade(shared, result_view);
    }

    let children: Vec<ViewId> = shared
        .views
        .read()
        .iter()
        .filter(|(_, rv)| rv.source == ViewSource::View(id))
        .map(|(child, _)| *child)
        .collect();
    for child in children {
        drop_view_cascade(shared, child);
    }
    tracing::debug!(view = %id, "view dropped");
}

//! One-at-a-time navigation over a view.

use crate::types::MessageId;
use crate::views::{ViewRead, ViewSource};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a cursor.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CursorId(pub u64);

impl fmt::Debug for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CursorId({})", self.0)
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying who initiated a navigation, so the originator can
/// ignore the echo of its own `IndexChanged`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventOrigin(pub u64);

/// Discrete cursor notifications.
///
/// `IndexIncremented` is silent: the same logical message sits at a new
/// numeric offset because the view is reverse-chronological. Consumers
/// rendering message content must ignore it; consumers rendering a
/// count/position label must react to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CursorEvent {
    /// User-visible selection change. Position 0 means "no selection".
    IndexChanged {
        cursor: CursorId,
        position: usize,
        origin: Option<EventOrigin>,
    },
    /// Silent renumbering of the held record (delta may be negative).
    IndexIncremented { cursor: CursorId, delta: i64 },
    /// Cursor jumped to the newest record; content must refresh.
    NavigatedToFirst { cursor: CursorId },
}

#[derive(Debug, Default)]
struct CursorState {
    /// 0 = no selection; otherwise in [1, view.len()].
    position: usize,
    /// Record currently displayed, used to keep the selection stable
    /// while the view renumbers underneath it.
    current: Option<MessageId>,
    /// Follow mode: jump to the newest record on every append.
    pin_latest: bool,
}

/// 1-based index into a view (1 = newest), clamped into `[1, len]` (or 0
/// when the view is empty) on every view mutation.
pub struct NavigationCursor {
    id: CursorId,
    target: ViewSource,
    state: RwLock<CursorState>,
}

impl NavigationCursor {
    pub fn new(id: CursorId, target: ViewSource) -> Self {
        Self {
            id,
            target,
            state: RwLock::new(CursorState::default()),
        }
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn target(&self) -> ViewSource {
        self.target
    }

    pub fn position(&self) -> usize {
        self.state.read().position
    }

    pub fn pinned_to_latest(&self) -> bool {
        self.state.read().pin_latest
    }

    pub fn set_pin_latest(&self, pin: bool) {
        self.state.write().pin_latest = pin;
    }

    /// Jump to the newest record. Always re-emits `NavigatedToFirst` when
    /// the view is non-empty, since the record at index 1 may have changed.
    pub fn first(&self, view: &dyn ViewRead) -> Vec<CursorEvent> {
        let mut state = self.state.write();
        self.first_locked(&mut state, view)
    }

    fn first_locked(&self, state: &mut CursorState, view: &dyn ViewRead) -> Vec<CursorEvent> {
        if view.is_empty() {
            return self.to_empty(state);
        }
        state.position = 1;
        state.current = view.get(1).map(|r| r.id);
        vec![CursorEvent::NavigatedToFirst { cursor: self.id }]
    }

    /// Jump to the oldest record.
    pub fn last(&self, view: &dyn ViewRead, origin: Option<EventOrigin>) -> Vec<CursorEvent> {
        let mut state = self.state.write();
        self.move_to(&mut state, view, view.len(), origin)
    }

    /// Step by a signed delta, clamped. Overshooting a bound collapses to
    /// `first()`/`last()`.
    pub fn step(
        &self,
        view: &dyn ViewRead,
        delta: i64,
        origin: Option<EventOrigin>,
    ) -> Vec<CursorEvent> {
        let mut state = self.state.write();
        let size = view.len();
        if size == 0 {
            return self.to_empty(&mut state);
        }
        if state.position == 0 {
            return self.first_locked(&mut state, view);
        }

        let target = state.position as i64 + delta;
        if target <= 1 {
            self.first_locked(&mut state, view)
        } else if target >= size as i64 {
            self.move_to(&mut state, view, size, origin)
        } else {
            self.move_to(&mut state, view, target as usize, origin)
        }
    }

    /// Absolute positioning, clamped into `[1, len]`.
    pub fn set_position(
        &self,
        view: &dyn ViewRead,
        position: usize,
        origin: Option<EventOrigin>,
    ) -> Vec<CursorEvent> {
        let mut state = self.state.write();
        let size = view.len();
        if size == 0 {
            return self.to_empty(&mut state);
        }
        self.move_to(&mut state, view, position.clamp(1, size), origin)
    }

    fn move_to(
        &self,
        state: &mut CursorState,
        view: &dyn ViewRead,
        position: usize,
        origin: Option<EventOrigin>,
    ) -> Vec<CursorEvent> {
        if view.is_empty() {
            return self.to_empty(state);
        }
        state.position = position;
        state.current = view.get(position).map(|r| r.id);
        vec![CursorEvent::IndexChanged {
            cursor: self.id,
            position,
            origin,
        }]
    }

    fn to_empty(&self, state: &mut CursorState) -> Vec<CursorEvent> {
        if state.position == 0 {
            return Vec::new();
        }
        state.position = 0;
        state.current = None;
        vec![CursorEvent::IndexChanged {
            cursor: self.id,
            position: 0,
            origin: None,
        }]
    }

    /// A record entered the view. Pinned cursors (and empty ones) jump to
    /// the newest record; otherwise the held record is kept and the
    /// renumbering is emitted silently.
    pub(crate) fn on_source_appended(&self, view: &dyn ViewRead) -> Vec<CursorEvent> {
        let mut state = self.state.write();
        if state.pin_latest || state.position == 0 {
            return self.first_locked(&mut state, view);
        }

        let size = view.len();
        let old = state.position;
        state.position = (old + 1).min(size);
        let delta = state.position as i64 - old as i64;
        if delta == 0 {
            return Vec::new();
        }
        vec![CursorEvent::IndexIncremented {
            cursor: self.id,
            delta,
        }]
    }

    /// Entries left the view (eviction, rebuild, or clear). If the held
    /// record survived, silently adjust to its new offset; if it was
    /// dropped, fall back to `first()`.
    pub(crate) fn on_view_trimmed(&self, view: &dyn ViewRead) -> Vec<CursorEvent> {
        let mut state = self.state.write();
        if view.is_empty() {
            return self.to_empty(&mut state);
        }
        if state.position == 0 {
            return Vec::new();
        }

        match state.current.and_then(|id| view.index_of(id)) {
            Some(index) => {
                let delta = index as i64 - state.position as i64;
                state.position = index;
                if delta == 0 {
                    Vec::new()
                } else {
                    vec![CursorEvent::IndexIncremented {
                        cursor: self.id,
                        delta,
                    }]
                }
            }
            None => self.first_locked(&mut state, view),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::views::{FilterConfig, FilteredView, ViewId};
    use crate::types::{FormatterSlot, IncomingMessage, MessageRecord};
    use std::sync::Arc;

    fn view_with(n: u64) -> (FilteredView, FormatterSlot) {
        let slot = FormatterSlot::default();
        let view = FilteredView::new(ViewId(1), FilterConfig::default());
        for i in 1..=n {
            push(&view, &slot, i);
        }
        (view, slot)
    }

    fn push(view: &FilteredView, slot: &FormatterSlot, id: u64) {
        let record = Arc::new(MessageRecord::new(
            MessageId(id),
            IncomingMessage::new("t1", format!("m{id}")),
        ));
        let formatted = record.formatted_payload(slot);
        view.on_source_appended(&record, &formatted);
    }

    fn cursor() -> NavigationCursor {
        NavigationCursor::new(CursorId(1), ViewSource::View(ViewId(1)))
    }

    #[test]
    fn test_first_last_step() {
        let (view, _slot) = view_with(3);
        let cursor = cursor();

        let events = cursor.first(&view);
        assert_eq!(events, vec![CursorEvent::NavigatedToFirst { cursor: CursorId(1) }]);
        assert_eq!(cursor.position(), 1);

        cursor.last(&view, None);
        assert_eq!(cursor.position(), 3);

        let events = cursor.step(&view, -1, None);
        assert_eq!(cursor.position(), 2);
        assert_eq!(
            events,
            vec![CursorEvent::IndexChanged {
                cursor: CursorId(1),
                position: 2,
                origin: None
            }]
        );
    }

    #[test]
    fn test_step_clamps_and_collapses() {
        let (view, _slot) = view_with(3);
        let cursor = cursor();
        cursor.set_position(&view, 2, None);

        // Overshooting the newest end collapses to first().
        let events = cursor.step(&view, -5, None);
        assert_eq!(cursor.position(), 1);
        assert_eq!(events, vec![CursorEvent::NavigatedToFirst { cursor: CursorId(1) }]);

        // Overshooting the oldest end collapses to last().
        cursor.step(&view, 99, None);
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_empty_view_is_position_zero() {
        let (view, _slot) = view_with(0);
        let cursor = cursor();

        assert!(cursor.first(&view).is_empty());
        assert_eq!(cursor.position(), 0);

        // Stays empty regardless of the operation.
        assert!(cursor.step(&view, 3, None).is_empty());
        assert!(cursor.last(&view, None).is_empty());
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_append_pinned_navigates_to_first() {
        let (view, slot) = view_with(2);
        let cursor = cursor();
        cursor.set_pin_latest(true);
        cursor.first(&view);

        push(&view, &slot, 10);
        let events = cursor.on_source_appended(&view);
        assert_eq!(events, vec![CursorEvent::NavigatedToFirst { cursor: CursorId(1) }]);
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_append_unpinned_holds_record_silently() {
        let (view, slot) = view_with(2);
        let cursor = cursor();
        cursor.set_position(&view, 1, None); // newest (id 2)

        push(&view, &slot, 10);
        let events = cursor.on_source_appended(&view);
        assert_eq!(
            events,
            vec![CursorEvent::IndexIncremented {
                cursor: CursorId(1),
                delta: 1
            }]
        );
        // Still the same record, now one offset further from the newest.
        assert_eq!(cursor.position(), 2);
        assert_eq!(view.get(2).unwrap().id, MessageId(2));
    }

    #[test]
    fn test_trim_keeps_selection_stable() {
        let (view, _slot) = view_with(4);
        let cursor = cursor();
        cursor.set_position(&view, 2, None); // id 3

        // Oldest entry (id 1, index 4) leaves; selection is unaffected.
        let oldest = view.snapshot()[0].clone();
        view.on_source_evicted(&[oldest]);
        let events = cursor.on_view_trimmed(&view);
        assert!(events.is_empty());
        assert_eq!(cursor.position(), 2);
        assert_eq!(view.get(2).unwrap().id, MessageId(3));
    }

    #[test]
    fn test_trim_adjusts_when_newer_entries_drop() {
        let (view, _slot) = view_with(4);
        let cursor = cursor();
        cursor.set_position(&view, 3, None); // id 2

        // The newest entry (index 1) is dropped by a rebuild; the held
        // record moves one offset toward the front, silently.
        let newest = view.snapshot()[3].clone();
        view.on_source_evicted(&[newest]);
        let events = cursor.on_view_trimmed(&view);
        assert_eq!(
            events,
            vec![CursorEvent::IndexIncremented {
                cursor: CursorId(1),
                delta: -1
            }]
        );
        assert_eq!(cursor.position(), 2);
        assert_eq!(view.get(2).unwrap().id, MessageId(2));
    }

    #[test]
    fn test_trim_of_displayed_record_forces_first() {
        let (view, _slot) = view_with(3);
        let cursor = cursor();
        cursor.set_position(&view, 2, None); // id 2

        let displayed = view.snapshot()[1].clone();
        view.on_source_evicted(&[displayed]);
        let events = cursor.on_view_trimmed(&view);
        assert_eq!(events, vec![CursorEvent::NavigatedToFirst { cursor: CursorId(1) }]);
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_view_emptied_resets_to_zero() {
        let (view, _slot) = view_with(1);
        let cursor = cursor();
        cursor.first(&view);

        view.on_source_evicted(&view.snapshot());
        let events = cursor.on_view_trimmed(&view);
        assert_eq!(
            events,
            vec![CursorEvent::IndexChanged {
                cursor: CursorId(1),
                position: 0,
                origin: None
            }]
        );
        assert_eq!(cursor.position(), 0);
    }
}

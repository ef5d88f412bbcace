//! Subscription manager for broadcasting store events.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
use crate::cursor::CursorEvent;

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// Try to send an event. Returns false if buffer is full (subscriber will be dropped).
    fn try_send(&self, event: StoreEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Check if this subscription matches a batch event.
    fn matches_batch(&self, event: &StoreEvent) -> bool {
        if !self.config.filter.include_batches {
            return false;
        }

        if let Some(ref topics) = self.config.filter.topics {
            if let StoreEvent::Batch {
                appended,
                coalesced,
                total_evicted,
                ..
            } = event
            {
                // A coalesced batch has no per-record summaries left to
                // filter on; deliver it rather than lose the signal.
                if !coalesced && *total_evicted == 0 {
                    return appended.iter().any(|s| topics.contains(&s.topic));
                }
            }
        }

        true
    }

    /// Check if this subscription wants a cursor event.
    fn matches_cursor(&self, event: &CursorEvent) -> bool {
        if !self.config.filter.include_cursor_events {
            return false;
        }

        if let Some(ref cursors) = self.config.filter.cursors {
            let id = match event {
                CursorEvent::IndexChanged { cursor, .. } => cursor,
                CursorEvent::IndexIncremented { cursor, .. } => cursor,
                CursorEvent::NavigatedToFirst { cursor } => cursor,
            };
            return cursors.contains(id);
        }

        true
    }

    fn wants_search_events(&self) -> bool {
        self.config.filter.include_search_events
    }
}

/// Manages subscriptions and broadcasts events.
///
/// Subscribers are kept in id order, so fan-out order is stable across
/// broadcasts. Deregistration is idempotent.
pub struct SubscriptionManager {
    /// Active subscriptions by ID, in registration order.
    subscriptions: RwLock<BTreeMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription and return a handle for receiving events.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size);

        let subscription = Subscription { config, sender };
        self.subscriptions.write().insert(id, subscription);

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up. Safe to call twice.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Send dropped event (best effort)
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Default summary payload threshold across subscribers, used by the
    /// dispatcher when building batch summaries.
    pub fn summary_threshold(&self) -> usize {
        self.subscriptions
            .read()
            .values()
            .map(|s| s.config.summary_payload_threshold)
            .max()
            .unwrap_or_else(|| SubscriptionConfig::default().summary_payload_threshold)
    }

    // --- Broadcasting ---

    /// Broadcast a dispatcher batch to matching subscriptions.
    pub fn broadcast_batch(&self, event: StoreEvent) {
        self.broadcast(|sub| sub.matches_batch(&event), event.clone());
    }

    /// Broadcast a cursor event to matching subscriptions.
    pub fn broadcast_cursor(&self, event: CursorEvent) {
        self.broadcast(
            |sub| sub.matches_cursor(&event),
            StoreEvent::Cursor(event.clone()),
        );
    }

    /// Broadcast a search completion.
    pub fn broadcast_search_completed(&self, event: StoreEvent) {
        self.broadcast(|sub| sub.wants_search_events(), event);
    }

    /// Broadcast a store clear to every subscriber.
    pub fn broadcast_cleared(&self) {
        self.broadcast(|_| true, StoreEvent::Cleared);
    }

    /// Drop every subscriber with a StoreClosed notice.
    pub fn close(&self) {
        let mut subs = self.subscriptions.write();
        for (_, sub) in std::mem::take(&mut *subs) {
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::StoreClosed,
            });
        }
    }

    /// Internal broadcast helper. Drops subscribers that fail to receive.
    fn broadcast<F>(&self, filter: F, event: StoreEvent)
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if filter(sub) && !sub.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow subscriber");
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = sub.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

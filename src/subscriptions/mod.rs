//! Observer fan-out for store events.

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, MessageSummary, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};

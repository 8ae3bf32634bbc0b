//! Subscription system for change notifications.
//!
//! Subscribers register a callback for one link key, or for every change
//! (wildcard). A change to a key reaches:
//! - All wildcard subscribers
//! - The key's own subscribers, in subscription order
//! - The same notification, cascaded to the keys it references
//!
//! Subscriptions support cancellation through an [`AbortSignal`] and
//! delivery through a bounded channel that drops slow consumers.
//!
//! # Example
//!
//! ```ignore
//! let state = GraphState::new(StateConfig::default())?;
//!
//! let unsubscribe = state.subscribe(
//!     "User:1",
//!     |next, prev| println!("{prev:?} -> {next:?}"),
//!     SubscribeOptions::default(),
//! );
//!
//! state.mutate("User:1", json!({"name": "Ada"}), MutateOptions::default())?;
//! unsubscribe.unsubscribe();
//! ```

mod manager;
mod types;

pub use manager::{Removal, SubscriptionManager};
pub use types::{
    AbortController, AbortSignal, Callback, ChangeEvent, ChannelConfig, DropReason,
    SubscribeOptions, SubscriberKey, SubscriptionId,
};

//! Subscriber registry for change notifications.

use crate::cache::ListenerId;
use crate::types::LinkKey;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{Callback, SubscriberKey, SubscriptionId};

/// Internal subscription state.
struct Subscriber {
    id: SubscriptionId,
    callback: Callback,
}

/// Result of removing a subscriber.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Removal {
    pub removed: bool,
    /// Removal hook to deregister, once the last subscriber of a key is gone.
    pub released_hook: Option<ListenerId>,
}

/// Manages subscriber lists per key.
pub struct SubscriptionManager {
    /// Ordered callbacks by key.
    subscribers: RwLock<HashMap<SubscriberKey, Vec<Subscriber>>>,
    /// Cache removal listener registered for each subscribed key.
    removal_hooks: RwLock<HashMap<LinkKey, ListenerId>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            removal_hooks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve an id for a subscription about to be added.
    pub fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Append a callback to the key's list.
    ///
    /// Returns true if it is the first subscriber of the key.
    pub fn add(&self, key: SubscriberKey, id: SubscriptionId, callback: Callback) -> bool {
        let mut subs = self.subscribers.write();
        let list = subs.entry(key).or_default();
        list.push(Subscriber { id, callback });
        list.len() == 1
    }

    /// Remove exactly the subscriber with `id`.
    pub fn remove(&self, key: &SubscriberKey, id: SubscriptionId) -> Removal {
        let mut subs = self.subscribers.write();
        let Some(list) = subs.get_mut(key) else {
            return Removal::default();
        };

        let before = list.len();
        list.retain(|sub| sub.id != id);
        let removed = list.len() != before;

        let mut released_hook = None;
        if list.is_empty() {
            subs.remove(key);
            if let SubscriberKey::Link(link) = key {
                released_hook = self.removal_hooks.write().remove(link);
            }
        }

        Removal {
            removed,
            released_hook,
        }
    }

    pub fn set_removal_hook(&self, key: &str, listener: ListenerId) {
        self.removal_hooks.write().insert(key.to_string(), listener);
    }

    /// Callbacks to run for a change of `key`: wildcard subscribers first,
    /// then the key's own, each in subscription order.
    pub fn callbacks_for(&self, key: &str) -> Vec<Callback> {
        let subs = self.subscribers.read();
        let wildcard = subs.get(&SubscriberKey::Wildcard).into_iter().flatten();
        let scoped = subs
            .get(&SubscriberKey::Link(key.to_string()))
            .into_iter()
            .flatten();
        wildcard.chain(scoped).map(|sub| sub.callback.clone()).collect()
    }

    /// Callbacks registered under exactly `key`.
    pub fn subscribers_of(&self, key: &SubscriberKey) -> Vec<Callback> {
        self.subscribers
            .read()
            .get(key)
            .map(|list| list.iter().map(|sub| sub.callback.clone()).collect())
            .unwrap_or_default()
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscribers.read().values().map(Vec::len).sum()
    }

    pub fn subscriber_count(&self, key: &SubscriberKey) -> usize {
        self.subscribers.read().get(key).map_or(0, Vec::len)
    }

    pub fn removal_hook_count(&self) -> usize {
        self.removal_hooks.read().len()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

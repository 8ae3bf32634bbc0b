//! Subscriptions, change notification, and invalidation.

use crate::cache::LinkCache;
use crate::error::{GraphError, Result};
use crate::keys::is_link_key;
use crate::store::{GraphState, StateInner, NOTIFY_DEPTH_LIMIT};
use crate::subscriptions::{
    Callback, ChangeEvent, ChannelConfig, DropReason, SubscribeOptions, SubscriberKey,
    SubscriptionId,
};
use crate::types::{EntityRef, LinkKey, ResolveOptions};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError, TrySendError};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Handle that removes one subscription.
///
/// Holds the state weakly; unsubscribing after the state is gone is a no-op.
#[derive(Clone)]
pub struct Unsubscribe {
    state: Weak<StateInner>,
    key: Option<SubscriberKey>,
    id: SubscriptionId,
}

impl Unsubscribe {
    /// Handle for a subscription that was never registered.
    fn inert() -> Self {
        Self {
            state: Weak::new(),
            key: None,
            id: SubscriptionId(0),
        }
    }

    /// Remove the subscription. Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        let (Some(inner), Some(key)) = (self.state.upgrade(), &self.key) else {
            return false;
        };
        GraphState { inner }.remove_subscriber(key, self.id)
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

/// Receiving end of a channel subscription.
pub struct ChangeStream {
    unsubscribe: Unsubscribe,
    receiver: Receiver<ChangeEvent>,
}

impl ChangeStream {
    /// Block until the next event. `None` once the subscription is gone and
    /// drained.
    pub fn recv(&self) -> Option<ChangeEvent> {
        self.receiver.recv().ok()
    }

    pub fn try_recv(&self) -> Option<ChangeEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn unsubscribe(&self) -> bool {
        self.unsubscribe.unsubscribe()
    }

    pub fn id(&self) -> SubscriptionId {
        self.unsubscribe.id()
    }
}

impl GraphState {
    // --- Subscribe ---

    /// Call `callback` with `(next, prev)` whenever `target` changes.
    ///
    /// `next` is `None` once the record is removed. A target that has no
    /// key yields an inert handle.
    pub fn subscribe<'a, F>(
        &self,
        target: impl Into<EntityRef<'a>>,
        callback: F,
        options: SubscribeOptions,
    ) -> Unsubscribe
    where
        F: Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    {
        match self.key_of(target.into()) {
            Some(key) => self.register(SubscriberKey::Link(key), Arc::new(callback), options),
            None => Unsubscribe::inert(),
        }
    }

    /// Call `callback` on every change to any key.
    pub fn subscribe_all<F>(&self, callback: F, options: SubscribeOptions) -> Unsubscribe
    where
        F: Fn(Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    {
        self.register(SubscriberKey::Wildcard, Arc::new(callback), options)
    }

    /// Deliver changes of `target`, or of everything, through a bounded
    /// channel.
    ///
    /// A consumer that lets the buffer fill up, or drops its receiver, is
    /// unsubscribed after a best-effort `Dropped` event.
    pub fn subscribe_channel(
        &self,
        target: Option<EntityRef<'_>>,
        config: ChannelConfig,
    ) -> ChangeStream {
        let key = match target {
            None => SubscriberKey::Wildcard,
            Some(target) => match self.key_of(target) {
                Some(key) => SubscriberKey::Link(key),
                None => {
                    let (_, receiver) = bounded(0);
                    return ChangeStream {
                        unsubscribe: Unsubscribe::inert(),
                        receiver,
                    };
                }
            },
        };

        let (sender, receiver) = bounded(config.buffer_size);
        let handle: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));

        let own_handle = Arc::clone(&handle);
        let callback: Callback = Arc::new(move |next: Option<&Value>, prev: Option<&Value>| {
            let event = ChangeEvent::Changed {
                next: next.cloned(),
                prev: prev.cloned(),
            };
            let reason = match sender.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => DropReason::BufferOverflow,
                Err(TrySendError::Disconnected(_)) => DropReason::Disconnected,
            };

            tracing::warn!(reason = ?reason, "dropping channel subscriber");
            let _ = sender.try_send(ChangeEvent::Dropped { reason });
            if let Some(unsubscribe) = own_handle.lock().take() {
                unsubscribe.unsubscribe();
            }
        });

        let unsubscribe = self.register(key, callback, SubscribeOptions::default());
        *handle.lock() = Some(unsubscribe.clone());

        ChangeStream {
            unsubscribe,
            receiver,
        }
    }

    fn register(&self, key: SubscriberKey, callback: Callback, options: SubscribeOptions) -> Unsubscribe {
        let subscriptions = &self.inner.subscriptions;
        let id = subscriptions.next_id();
        let first = subscriptions.add(key.clone(), id, callback);

        if let (true, SubscriberKey::Link(link)) = (first, &key) {
            let hook = self.removal_hook(link.clone());
            subscriptions.set_removal_hook(link, hook);
        }
        tracing::trace!(key = ?key, id = id.0, "subscribe");

        let unsubscribe = Unsubscribe {
            state: Arc::downgrade(&self.inner),
            key: Some(key),
            id,
        };
        if let Some(signal) = options.signal {
            let on_abort = unsubscribe.clone();
            signal.on_abort(move || {
                on_abort.unsubscribe();
            });
        }
        unsubscribe
    }

    /// Tell the subscribers of `watched` when its record is swept or
    /// invalidated.
    fn removal_hook(&self, watched: LinkKey) -> crate::cache::ListenerId {
        let state = Arc::downgrade(&self.inner);
        self.on_remove_link(move |removed, previous| {
            if removed != watched {
                return;
            }
            let Some(inner) = state.upgrade() else {
                tracing::warn!(key = %watched, "removal hook outlived its state");
                return;
            };
            let key = SubscriberKey::Link(watched.clone());
            for callback in inner.subscriptions.subscribers_of(&key) {
                callback(None, previous);
            }
        })
    }

    fn remove_subscriber(&self, key: &SubscriberKey, id: SubscriptionId) -> bool {
        let removal = self.inner.subscriptions.remove(key, id);
        if let Some(hook) = removal.released_hook {
            self.off_remove_link(hook);
        }
        tracing::trace!(key = ?key, id = id.0, removed = removal.removed, "unsubscribe");
        removal.removed
    }

    // --- Notify ---

    /// Deliver the current value of `key` with `prev` to its subscribers,
    /// wildcard subscribers first, then cascade to the keys it references.
    ///
    /// Each key is visited once per call. A cascade deeper than
    /// [`NOTIFY_DEPTH_LIMIT`] fails with [`GraphError::NotifyDepthExceeded`].
    pub fn notify(&self, key: &str, prev: Option<&Value>) -> Result<()> {
        let mut visited = HashSet::new();
        self.notify_cascade(key, prev, &mut visited, 0)
    }

    fn notify_cascade(
        &self,
        key: &str,
        prev: Option<&Value>,
        visited: &mut HashSet<LinkKey>,
        depth: usize,
    ) -> Result<()> {
        if !visited.insert(key.to_string()) {
            return Ok(());
        }
        if depth > NOTIFY_DEPTH_LIMIT {
            tracing::error!(key = %key, depth, "notification cascade too deep");
            return Err(GraphError::NotifyDepthExceeded {
                key: key.to_string(),
                limit: NOTIFY_DEPTH_LIMIT,
            });
        }

        let callbacks = self.inner.subscriptions.callbacks_for(key);
        if !callbacks.is_empty() {
            let next = self.resolve(key, ResolveOptions::default());
            for callback in callbacks {
                callback(next.as_ref(), prev);
            }
        }

        if self.inner.cascade_to_children {
            for child in self.inner.cache.get_children(key) {
                self.notify_cascade(&child, prev, visited, depth + 1)?;
            }
        }
        Ok(())
    }

    // --- Invalidate ---

    /// Delete an entity and the partial keys it owns, regardless of
    /// references, then rewrite each surviving parent without the dangling
    /// reference and notify it with its value from before the delete.
    pub fn invalidate<'a>(&self, entity: impl Into<EntityRef<'a>>) -> Result<()> {
        let Some(key) = self.key_of(entity.into()) else {
            return Ok(());
        };
        let cache = &self.inner.cache;

        let mut parents = BTreeSet::new();
        for parent in cache.get_parents(&key) {
            if let Some(owner) = cache.owner_of(&parent) {
                parents.insert(owner);
            }
            parents.insert(parent);
        }
        let snapshots: Vec<(LinkKey, Option<Value>)> = parents
            .into_iter()
            .map(|parent| {
                let snapshot = self.resolve(&parent, ResolveOptions::default());
                (parent, snapshot)
            })
            .collect();

        tracing::debug!(key = %key, parents = snapshots.len(), "invalidate entity");
        cache.invalidate(&key);

        for (parent, snapshot) in snapshots {
            let Some(record) = cache.read_link(&parent) else {
                continue;
            };
            cache.write_link(&parent, prune_dangling(record, cache), None);
            self.notify(&parent, snapshot.as_ref())?;
        }
        Ok(())
    }
}

/// Drop references to missing records: array items are removed, scalar
/// fields become null.
fn prune_dangling(record: Value, cache: &LinkCache) -> Value {
    fn prune(value: Value, cache: &LinkCache) -> Option<Value> {
        match value {
            Value::String(link) if is_link_key(&link) && !cache.has_link(&link) => None,
            Value::Array(items) => Some(Value::Array(
                items.into_iter().filter_map(|item| prune(item, cache)).collect(),
            )),
            other => Some(other),
        }
    }

    let Value::Object(fields) = record else {
        return record;
    };
    let fields: Map<String, Value> = fields
        .into_iter()
        .map(|(field, value)| (field, prune(value, cache).unwrap_or(Value::Null)))
        .collect();
    Value::Object(fields)
}

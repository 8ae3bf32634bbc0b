//! Subscription types for change notifications.

use crate::types::LinkKey;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Receives `(next, previous)` values of a changed key.
pub type Callback = Arc<dyn Fn(Option<&Value>, Option<&Value>) + Send + Sync>;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// What a subscription listens to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubscriberKey {
    /// Every change in the store.
    Wildcard,
    Link(LinkKey),
}

/// Options for a subscription.
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    /// Unsubscribes when aborted.
    pub signal: Option<AbortSignal>,
}

impl SubscribeOptions {
    pub fn with_signal(signal: AbortSignal) -> Self {
        Self {
            signal: Some(signal),
        }
    }
}

type AbortHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SignalState {
    aborted: bool,
    hooks: Vec<AbortHook>,
}

/// Cancellation signal observed by subscriptions.
#[derive(Clone, Default)]
pub struct AbortSignal {
    state: Arc<Mutex<SignalState>>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Run `hook` once when the signal aborts, or now if it already has.
    pub fn on_abort(&self, hook: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock();
        if state.aborted {
            drop(state);
            hook();
        } else {
            state.hooks.push(Box::new(hook));
        }
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AbortSignal")
            .field("aborted", &state.aborted)
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

/// Owner side of an [`AbortSignal`].
#[derive(Clone, Debug, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the signal. Hooks run once, outside the signal's lock.
    pub fn abort(&self) {
        let hooks = {
            let mut state = self.signal.state.lock();
            if state.aborted {
                return;
            }
            state.aborted = true;
            std::mem::take(&mut state.hooks)
        };
        for hook in hooks {
            hook();
        }
    }
}

/// Configuration for a channel subscription.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Max buffered events before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Events delivered through a channel subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// A watched value changed.
    Changed {
        next: Option<Value>,
        prev: Option<Value>,
    },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a channel subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver was dropped.
    Disconnected,
}

//! Main GraphState struct tying all components together.

use crate::cache::{LinkCache, ListenerId, RemoveListener};
use crate::error::Result;
use crate::keys::{KeyGenerator, KeyResolver};
use crate::plugins::{run_plugins, Plugin};
use crate::subscriptions::SubscriptionManager;
use crate::types::{
    EntityRef, GraphStats, IdSequence, LinkKey, MutateOptions, Patch, ResolveOptions,
    SkipPredicate,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Type of the state's own root entity unless configured otherwise.
const STATE_TYPE: &str = "State";

/// Deepest notification cascade tolerated before giving up.
pub const NOTIFY_DEPTH_LIMIT: usize = 100;

/// Graph state configuration.
#[derive(Clone)]
pub struct StateConfig {
    /// Type of the root entity.
    pub root_type: String,

    /// Id of the root entity. Drawn from `ids` when unset.
    pub root_id: Option<String>,

    /// Sequence for default root ids.
    pub ids: IdSequence,

    /// Id generators by entity type.
    pub keys: HashMap<String, KeyGenerator>,

    /// Nested data written into the root on construction.
    pub initial_state: Option<Value>,

    /// Values matching any predicate are stored verbatim.
    pub skip: Vec<SkipPredicate>,

    /// Applied in order to the assembled state.
    pub plugins: Vec<Plugin>,

    /// Whether a notification also reaches the keys the changed key references.
    pub cascade_to_children: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            root_type: STATE_TYPE.to_string(),
            root_id: None,
            ids: IdSequence::new(),
            keys: HashMap::new(),
            initial_state: None,
            skip: Vec::new(),
            plugins: Vec::new(),
            cascade_to_children: true,
        }
    }
}

impl StateConfig {
    pub fn with_key(
        mut self,
        type_name: impl Into<String>,
        generator: impl Fn(&Value) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.keys.insert(type_name.into(), Arc::new(generator));
        self
    }

    pub fn with_skip(mut self, predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.skip.push(Arc::new(predicate));
        self
    }

    pub fn with_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_initial_state(mut self, initial_state: Value) -> Self {
        self.initial_state = Some(initial_state);
        self
    }
}

impl fmt::Debug for StateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut key_types: Vec<&String> = self.keys.keys().collect();
        key_types.sort();
        f.debug_struct("StateConfig")
            .field("root_type", &self.root_type)
            .field("root_id", &self.root_id)
            .field("keys", &key_types)
            .field("initial_state", &self.initial_state)
            .field("skip", &self.skip.len())
            .field("plugins", &self.plugins.len())
            .field("cascade_to_children", &self.cascade_to_children)
            .finish()
    }
}

pub(crate) struct StateInner {
    pub(crate) root_type: String,
    pub(crate) root_id: String,
    pub(crate) root_key: LinkKey,
    pub(crate) keys: KeyResolver,
    pub(crate) skip: Vec<SkipPredicate>,
    pub(crate) cascade_to_children: bool,
    pub(crate) cache: LinkCache,
    pub(crate) subscriptions: SubscriptionManager,
}

/// An in-memory normalized entity graph.
///
/// Provides a unified interface for:
/// - Writing nested entities, flattened into keyed records
/// - Reading denormalized views of a key
/// - Subscribing to changes of one key or of everything
/// - Invalidating records and collecting unreachable ones
///
/// The handle is cheap to clone; clones share one graph.
#[derive(Clone)]
pub struct GraphState {
    pub(crate) inner: Arc<StateInner>,
}

impl GraphState {
    /// Build a state, seed its initial data, and apply plugins.
    pub fn new(config: StateConfig) -> Result<Self> {
        let root_id = config.root_id.clone().unwrap_or_else(|| config.ids.next_id());
        let root_key = format!("{}:{}", config.root_type, root_id);

        let cache = LinkCache::new();
        cache.pin(&root_key);

        let state = Self {
            inner: Arc::new(StateInner {
                root_type: config.root_type.clone(),
                root_id,
                root_key,
                keys: KeyResolver::new(config.keys.clone()),
                skip: config.skip.clone(),
                cascade_to_children: config.cascade_to_children,
                cache,
                subscriptions: SubscriptionManager::new(),
            }),
        };

        if let Some(initial_state) = config.initial_state {
            let root = state.root_key().to_string();
            state.mutate(&root, Patch::Data(initial_state), MutateOptions::replace())?;
        }

        Ok(run_plugins(state, &config.plugins))
    }

    pub fn root_key(&self) -> &str {
        &self.inner.root_key
    }

    pub fn root_type(&self) -> &str {
        &self.inner.root_type
    }

    pub fn root_id(&self) -> &str {
        &self.inner.root_id
    }

    // --- Identity ---

    pub fn key_of_entity(&self, entity: &Value) -> Option<LinkKey> {
        self.inner.keys.key_of_entity(entity)
    }

    pub fn entity_of_key(&self, entity: &Value) -> Option<Value> {
        self.inner.keys.entity_of_key(entity)
    }

    pub(crate) fn key_of(&self, entity: EntityRef<'_>) -> Option<LinkKey> {
        self.inner.keys.key_of(entity)
    }

    pub(crate) fn is_skipped(&self, value: &Value) -> bool {
        self.inner.skip.iter().any(|predicate| predicate(value))
    }

    // --- Introspection ---

    /// Keys of every stored entity of a type.
    pub fn inspect_fields(&self, type_name: &str) -> Vec<LinkKey> {
        self.inner.cache.inspect_type(type_name)
    }

    /// Snapshot of the type index.
    pub fn types(&self) -> BTreeMap<String, BTreeSet<LinkKey>> {
        self.inner.cache.types()
    }

    /// Resolve every current parent of an entity.
    pub fn resolve_parents<'a>(&self, entity: impl Into<EntityRef<'a>>) -> Vec<Value> {
        let Some(key) = self.key_of(entity.into()) else {
            return Vec::new();
        };
        self.inner
            .cache
            .get_parents(&key)
            .iter()
            .filter_map(|parent| self.resolve(parent, ResolveOptions::default()))
            .collect()
    }

    /// Raw access to the link cache.
    pub fn cache(&self) -> &LinkCache {
        &self.inner.cache
    }

    /// Register a raw listener for swept and invalidated records.
    pub fn on_remove_link(
        &self,
        listener: impl Fn(&str, Option<&Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        let listener: RemoveListener = Arc::new(listener);
        self.inner.cache.on_remove_link(listener)
    }

    pub fn off_remove_link(&self, id: ListenerId) -> bool {
        self.inner.cache.off_remove_link(id)
    }

    pub fn stats(&self) -> GraphStats {
        let cache = &self.inner.cache;
        GraphStats {
            record_count: cache.len(),
            type_count: cache.type_count(),
            edge_count: cache.edge_count(),
            root_count: cache.root_count(),
            subscription_count: self.inner.subscriptions.subscription_count(),
        }
    }
}

impl fmt::Debug for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphState")
            .field("root_key", &self.inner.root_key)
            .field("keys", &self.inner.keys)
            .field("stats", &self.stats())
            .finish()
    }
}

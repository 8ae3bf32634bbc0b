//! Flat link storage with reference tracking and garbage collection.

use super::index::{Adjacency, TypeIndex};
use crate::keys::{is_link_key, is_owned_by, type_of_key};
use crate::types::LinkKey;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Called with the removed key and its last record.
pub type RemoveListener = Arc<dyn Fn(&str, Option<&Value>) + Send + Sync>;

/// Identity of a registered removal listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Default)]
struct LinkTables {
    /// key -> normalized record.
    records: HashMap<LinkKey, Value>,
    links: Adjacency,
    types: TypeIndex,
    /// Keys written directly while nothing referenced them.
    roots: HashSet<LinkKey>,
    /// Permanent roots.
    pinned: HashSet<LinkKey>,
    /// partial key -> the entity that owns it.
    partials: HashMap<LinkKey, LinkKey>,
}

impl LinkTables {
    fn remove_record(&mut self, key: &str) -> Option<Value> {
        let previous = self.records.remove(key)?;
        self.links.detach(key);
        self.roots.remove(key);
        if self.partials.remove(key).is_none() {
            if let Some(type_name) = type_of_key(key) {
                self.types.remove(type_name, key);
            }
        }
        Some(previous)
    }

    /// The entity owning a partial written under `parent`.
    fn owner_through(&self, parent: &str) -> LinkKey {
        self.partials
            .get(parent)
            .cloned()
            .unwrap_or_else(|| parent.to_string())
    }

    fn store(&mut self, key: &str, record: Value, parent: Option<&str>) {
        let mut children = record_links(&record);
        children.remove(key);

        let released: Vec<LinkKey> = self
            .links
            .children(key)
            .filter(|child| !children.contains_key(*child))
            .cloned()
            .collect();
        for child in self.links.replace_children(key, children) {
            self.roots.remove(&child);
        }
        for child in &released {
            tracing::debug!(parent = %key, child = %child, "released reference");
        }

        if let Some(parent) = parent {
            self.links.link(parent, key);
            self.roots.remove(key);
        }

        if !self.partials.contains_key(key) {
            if let Some(type_name) = type_of_key(key) {
                self.types.insert(type_name, key);
            }
        }

        tracing::trace!(key = %key, parent = ?parent, "write link");
        self.records.insert(key.to_string(), record);
    }

    /// Every key reachable from a root.
    fn mark(&self) -> HashSet<LinkKey> {
        let mut marked = HashSet::new();
        let mut stack: Vec<&LinkKey> = self.pinned.iter().chain(self.roots.iter()).collect();

        while let Some(key) = stack.pop() {
            if marked.insert(key.clone()) {
                stack.extend(self.links.children(key).filter(|child| !marked.contains(*child)));
            }
        }
        marked
    }
}

/// Storage for normalized records keyed by link key.
///
/// Tracks which keys reference which, indexes keys by type, and sweeps
/// records that are no longer reachable from a root.
pub struct LinkCache {
    tables: RwLock<LinkTables>,
    listeners: RwLock<Vec<(ListenerId, RemoveListener)>>,
    next_listener: AtomicU64,
}

impl LinkCache {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(LinkTables::default()),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Make `key` a permanent garbage collection root.
    pub fn pin(&self, key: &str) {
        self.tables.write().pinned.insert(key.to_string());
    }

    /// Root `key` until some record references it.
    pub fn add_root(&self, key: &str) {
        self.tables.write().roots.insert(key.to_string());
    }

    pub fn read_link(&self, key: &str) -> Option<Value> {
        self.tables.read().records.get(key).cloned()
    }

    pub fn has_link(&self, key: &str) -> bool {
        self.tables.read().records.contains_key(key)
    }

    /// Store a record, overwriting any previous one.
    ///
    /// The key's outgoing edges are recomputed from the links in `record`.
    /// With a `parent`, one reference `parent -> key` is recorded as well.
    /// A key already known as a partial stays one.
    pub fn write_link(&self, key: &str, record: Value, parent: Option<&str>) {
        self.tables.write().store(key, record, parent);
    }

    /// Store the record of an anonymous value nested under `parent`.
    ///
    /// The key becomes a partial owned by the entity behind `parent`: it is
    /// not indexed by type and lives as long as that entity. Without a parent
    /// a key not already known as a partial is stored as an entity.
    pub fn write_partial(&self, key: &str, record: Value, parent: Option<&str>) {
        let mut tables = self.tables.write();
        let owner = match tables.partials.get(key) {
            Some(owner) => Some(owner.clone()),
            None => parent.map(|parent| tables.owner_through(parent)),
        };

        if let Some(owner) = owner {
            if let Some(type_name) = type_of_key(key) {
                tables.types.remove(type_name, key);
            }
            tables.partials.insert(key.to_string(), owner);
        }
        tables.store(key, record, parent);
    }

    /// Whether `key` was written as a partial.
    pub fn is_partial(&self, key: &str) -> bool {
        self.tables.read().partials.contains_key(key)
    }

    /// The entity owning a partial key.
    pub fn owner_of(&self, key: &str) -> Option<LinkKey> {
        self.tables.read().partials.get(key).cloned()
    }

    pub fn get_children(&self, key: &str) -> Vec<LinkKey> {
        self.tables.read().links.children(key).cloned().collect()
    }

    pub fn get_parents(&self, key: &str) -> Vec<LinkKey> {
        self.tables.read().links.parents(key).cloned().collect()
    }

    /// Drop one reference `parent -> child`. The edge goes away with its
    /// last reference.
    pub fn remove_refs(&self, parent: &str, child: &str) -> bool {
        self.tables.write().links.unlink(parent, child)
    }

    /// Delete a record, its outgoing edges, and every partial key it owns,
    /// regardless of remaining references.
    ///
    /// Returns the removed record.
    pub fn invalidate(&self, key: &str) -> Option<Value> {
        let removed = {
            let mut tables = self.tables.write();
            let key_is_partial = tables.partials.contains_key(key);
            let owned: Vec<LinkKey> = tables
                .partials
                .iter()
                .filter(|(candidate, owner)| {
                    if key_is_partial {
                        is_owned_by(candidate, key)
                    } else {
                        owner.as_str() == key
                    }
                })
                .map(|(candidate, _)| candidate.clone())
                .collect();

            let mut removed = Vec::new();
            for target in std::iter::once(key.to_string()).chain(owned) {
                if let Some(previous) = tables.remove_record(&target) {
                    removed.push((target, previous));
                }
            }
            removed
        };

        tracing::debug!(key = %key, removed = removed.len(), "invalidate link");
        let previous = removed
            .iter()
            .find(|(target, _)| target == key)
            .map(|(_, record)| record.clone());
        self.emit_removed(&removed);
        previous
    }

    /// Sweep every record no longer reachable from a root.
    ///
    /// Partial keys are only swept together with their owner. An unreferenced
    /// partial stays while its owner lives, so entities it references may be
    /// swept and leave dangling links in it; resolve prunes those. Returns
    /// the removed keys.
    pub fn run_garbage_collector(&self) -> Vec<LinkKey> {
        let removed = {
            let mut tables = self.tables.write();
            let marked = tables.mark();

            let unreachable: Vec<LinkKey> = tables
                .records
                .keys()
                .filter(|key| !marked.contains(*key) && !tables.partials.contains_key(*key))
                .cloned()
                .collect();

            let mut removed = Vec::new();
            for key in unreachable {
                if let Some(previous) = tables.remove_record(&key) {
                    removed.push((key, previous));
                }
            }

            let orphaned: Vec<LinkKey> = tables
                .partials
                .iter()
                .filter(|(key, owner)| !marked.contains(*key) && !tables.records.contains_key(*owner))
                .map(|(key, _)| key.clone())
                .collect();

            for key in orphaned {
                if let Some(previous) = tables.remove_record(&key) {
                    removed.push((key, previous));
                }
            }
            removed
        };

        for (key, _) in &removed {
            tracing::debug!(key = %key, "garbage collector removed link");
        }
        self.emit_removed(&removed);
        removed.into_iter().map(|(key, _)| key).collect()
    }

    /// Register a listener for swept and invalidated records.
    pub fn on_remove_link(&self, listener: RemoveListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn off_remove_link(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Keys of one type.
    pub fn inspect_type(&self, type_name: &str) -> Vec<LinkKey> {
        self.tables.read().types.get(type_name).cloned().collect()
    }

    pub fn types(&self) -> BTreeMap<String, BTreeSet<LinkKey>> {
        self.tables.read().types.snapshot()
    }

    pub fn type_count(&self) -> usize {
        self.tables.read().types.type_count()
    }

    pub fn len(&self) -> usize {
        self.tables.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().records.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.tables.read().links.edge_count()
    }

    pub fn root_count(&self) -> usize {
        let tables = self.tables.read();
        tables.pinned.len() + tables.roots.difference(&tables.pinned).count()
    }

    /// Listeners run outside the table lock so they may read the cache.
    fn emit_removed(&self, removed: &[(LinkKey, Value)]) {
        if removed.is_empty() {
            return;
        }
        let listeners: Vec<RemoveListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for (key, previous) in removed {
            for listener in &listeners {
                listener(key, Some(previous));
            }
        }
    }
}

impl Default for LinkCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Link keys a record references, with how often: string fields and array
/// items, through nested arrays. Objects are opaque.
pub fn record_links(record: &Value) -> BTreeMap<LinkKey, usize> {
    fn collect(value: &Value, links: &mut BTreeMap<LinkKey, usize>) {
        match value {
            Value::String(s) if is_link_key(s) => {
                *links.entry(s.clone()).or_insert(0) += 1;
            }
            Value::Array(items) => items.iter().for_each(|item| collect(item, links)),
            _ => {}
        }
    }

    let mut links = BTreeMap::new();
    if let Value::Object(fields) = record {
        fields.values().for_each(|value| collect(value, &mut links));
    }
    links
}

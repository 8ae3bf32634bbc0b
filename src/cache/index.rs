//! Indices over link keys: the bidirectional adjacency index and the type index.

use crate::types::LinkKey;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Parent/child edges between link keys, kept in both directions.
///
/// Each edge carries the number of references the parent's record holds to
/// the child, so dropping one reference keeps the edge while others remain.
#[derive(Debug, Default)]
pub struct Adjacency {
    /// parent -> children it references, with reference counts.
    children: HashMap<LinkKey, BTreeMap<LinkKey, usize>>,
    /// child -> parents referencing it.
    parents: HashMap<LinkKey, BTreeSet<LinkKey>>,
}

impl Adjacency {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reference. Returns true if the edge is new.
    pub fn link(&mut self, parent: &str, child: &str) -> bool {
        let count = self
            .children
            .entry(parent.to_string())
            .or_default()
            .entry(child.to_string())
            .or_insert(0);
        *count += 1;
        self.parents
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
        *count == 1
    }

    /// Drop one reference; the edge goes with the last one. Returns false if
    /// there was none.
    pub fn unlink(&mut self, parent: &str, child: &str) -> bool {
        let Some(refs) = self.children.get_mut(parent) else {
            return false;
        };
        let Some(count) = refs.get_mut(child) else {
            return false;
        };

        *count -= 1;
        if *count == 0 {
            refs.remove(child);
            if refs.is_empty() {
                self.children.remove(parent);
            }
            remove_from(&mut self.parents, child, parent);
        }
        true
    }

    /// Make `next` the exact references of `parent`.
    ///
    /// Returns the children that were not linked before.
    pub fn replace_children(&mut self, parent: &str, next: BTreeMap<LinkKey, usize>) -> Vec<LinkKey> {
        let previous = self.children.remove(parent).unwrap_or_default();

        for gone in previous.keys().filter(|child| !next.contains_key(*child)) {
            remove_from(&mut self.parents, gone, parent);
        }

        let added: Vec<LinkKey> = next
            .keys()
            .filter(|child| !previous.contains_key(*child))
            .cloned()
            .collect();
        for child in &added {
            self.parents
                .entry(child.clone())
                .or_default()
                .insert(parent.to_string());
        }

        if !next.is_empty() {
            self.children.insert(parent.to_string(), next);
        }
        added
    }

    /// Drop every outgoing edge of `parent`.
    pub fn detach(&mut self, parent: &str) {
        self.replace_children(parent, BTreeMap::new());
    }

    pub fn children(&self, parent: &str) -> impl Iterator<Item = &LinkKey> + '_ {
        self.children.get(parent).into_iter().flat_map(BTreeMap::keys)
    }

    pub fn parents(&self, child: &str) -> impl Iterator<Item = &LinkKey> + '_ {
        self.parents.get(child).into_iter().flatten()
    }

    pub fn has_parents(&self, child: &str) -> bool {
        self.parents.get(child).is_some_and(|set| !set.is_empty())
    }

    /// References `parent` holds to `child`.
    pub fn reference_count(&self, parent: &str, child: &str) -> usize {
        self.children
            .get(parent)
            .and_then(|refs| refs.get(child))
            .copied()
            .unwrap_or(0)
    }

    /// Distinct parent/child edges.
    pub fn edge_count(&self) -> usize {
        self.children.values().map(BTreeMap::len).sum()
    }
}

fn remove_from(map: &mut HashMap<LinkKey, BTreeSet<LinkKey>>, key: &str, value: &str) -> bool {
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}

/// Type index: type name -> keys of that type.
#[derive(Debug, Default)]
pub struct TypeIndex {
    index: HashMap<String, BTreeSet<LinkKey>>,
}

impl TypeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, type_name: &str, key: &str) {
        self.index
            .entry(type_name.to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub fn remove(&mut self, type_name: &str, key: &str) {
        remove_from(&mut self.index, type_name, key);
    }

    pub fn get(&self, type_name: &str) -> impl Iterator<Item = &LinkKey> + '_ {
        self.index.get(type_name).into_iter().flatten()
    }

    pub fn type_count(&self) -> usize {
        self.index.len()
    }

    pub fn snapshot(&self) -> BTreeMap<String, BTreeSet<LinkKey>> {
        self.index
            .iter()
            .map(|(type_name, keys)| (type_name.clone(), keys.clone()))
            .collect()
    }
}

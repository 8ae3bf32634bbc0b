//! Core types for the graph state.

use crate::error::Result;
use crate::store::GraphState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Canonical identity of a trackable entity, `"Type:id"`.
pub type LinkKey = String;

/// Marks a value as opaque: it is stored verbatim and never normalized.
pub type SkipPredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Decides replacement from the draft about to be written.
pub type ReplacePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Substitute for the nested write step. Returns the key stored in the field.
pub type CustomWrite = Arc<dyn Fn(&GraphState, NestedWrite) -> Result<Option<LinkKey>> + Send + Sync>;

/// A logical handle on an entity: its key, or an object carrying identity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EntityRef<'a> {
    Key(&'a str),
    Object(&'a Value),
}

impl EntityRef<'_> {
    /// The handle as a JSON value (what safe resolution echoes back).
    pub fn to_value(&self) -> Value {
        match self {
            EntityRef::Key(key) => Value::String((*key).to_string()),
            EntityRef::Object(value) => (*value).clone(),
        }
    }
}

impl<'a> From<&'a str> for EntityRef<'a> {
    fn from(key: &'a str) -> Self {
        EntityRef::Key(key)
    }
}

impl<'a> From<&'a String> for EntityRef<'a> {
    fn from(key: &'a String) -> Self {
        EntityRef::Key(key.as_str())
    }
}

impl<'a> From<&'a Value> for EntityRef<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::String(key) => EntityRef::Key(key.as_str()),
            other => EntityRef::Object(other),
        }
    }
}

/// Options for denormalizing reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Expand every reference, not only the ones owned by the resolved key.
    pub deep: bool,
    /// Echo unknown input back instead of returning `None`, and keep
    /// dangling references as bare keys.
    pub safe: bool,
}

impl ResolveOptions {
    pub fn deep() -> Self {
        Self {
            deep: true,
            safe: false,
        }
    }

    pub fn safe() -> Self {
        Self {
            deep: false,
            safe: true,
        }
    }
}

/// Whether a write replaces the previous record or merges over it.
#[derive(Clone, Default)]
pub enum ReplacePolicy {
    /// Fields merge shallowly over the previous record; arrays append.
    #[default]
    Merge,
    /// The top-level target and partial keys are replaced; nested entities
    /// with their own identity still merge.
    Replace,
    /// Every record touched by the write is replaced.
    Deep,
    /// Replace when the predicate accepts the draft.
    When(ReplacePredicate),
}

impl fmt::Debug for ReplacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacePolicy::Merge => write!(f, "Merge"),
            ReplacePolicy::Replace => write!(f, "Replace"),
            ReplacePolicy::Deep => write!(f, "Deep"),
            ReplacePolicy::When(_) => write!(f, "When(..)"),
        }
    }
}

/// How nested values found during normalization are written.
#[derive(Clone, Default)]
pub enum WriteStrategy {
    /// Recurse into the mutation engine under the caller's transaction.
    #[default]
    Normalize,
    /// Hand each nested write to a caller-supplied function.
    Custom(CustomWrite),
}

impl fmt::Debug for WriteStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStrategy::Normalize => write!(f, "Normalize"),
            WriteStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A nested value on its way to its own record.
#[derive(Clone, Debug)]
pub struct NestedWrite {
    /// Entity key, or the partial key derived from the field path.
    pub key: LinkKey,
    /// Record that will reference the written key.
    pub parent: LinkKey,
    pub data: Value,
    /// Set when `key` is a partial key; write it with `LinkCache::write_partial`.
    pub partial: bool,
}

/// Options for a mutate call.
#[derive(Clone, Debug)]
pub struct MutateOptions {
    pub replace: ReplacePolicy,
    /// Collapse duplicate array values, keeping first occurrences.
    /// Default: true
    pub dedup: bool,
    pub write: WriteStrategy,
}

impl Default for MutateOptions {
    fn default() -> Self {
        Self {
            replace: ReplacePolicy::Merge,
            dedup: true,
            write: WriteStrategy::Normalize,
        }
    }
}

impl MutateOptions {
    pub fn replace() -> Self {
        Self {
            replace: ReplacePolicy::Replace,
            ..Default::default()
        }
    }

    pub fn deep_replace() -> Self {
        Self {
            replace: ReplacePolicy::Deep,
            ..Default::default()
        }
    }

    pub fn replace_when(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            replace: ReplacePolicy::When(Arc::new(predicate)),
            ..Default::default()
        }
    }

    pub fn without_dedup(mut self) -> Self {
        self.dedup = false;
        self
    }

    pub fn with_write(
        mut self,
        write: impl Fn(&GraphState, NestedWrite) -> Result<Option<LinkKey>> + Send + Sync + 'static,
    ) -> Self {
        self.write = WriteStrategy::Custom(Arc::new(write));
        self
    }
}

/// Data for a mutate call: a literal patch, or a function of the current view.
pub enum Patch<'a> {
    Data(Value),
    Update(Box<dyn FnOnce(Option<Value>) -> Value + 'a>),
}

impl<'a> Patch<'a> {
    pub fn update(f: impl FnOnce(Option<Value>) -> Value + 'a) -> Self {
        Patch::Update(Box::new(f))
    }
}

impl From<Value> for Patch<'_> {
    fn from(value: Value) -> Self {
        Patch::Data(value)
    }
}

impl fmt::Debug for Patch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Patch::Update(_) => write!(f, "Update(..)"),
        }
    }
}

/// Sequence of default root ids.
///
/// Each config gets its own sequence, so independently built states never
/// share identity. Clone one sequence into several configs to give their
/// roots distinct ids.
#[derive(Clone, Debug, Default)]
pub struct IdSequence(Arc<AtomicU64>);

impl IdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        self.0.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

/// Graph statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub record_count: usize,
    pub type_count: usize,
    pub edge_count: usize,
    pub root_count: usize,
    pub subscription_count: usize,
}

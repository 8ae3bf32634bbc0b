//! Denormalizing reads.

use crate::error::{GraphError, Result};
use crate::keys::{is_link_key, is_owned_by};
use crate::store::GraphState;
use crate::types::{EntityRef, ResolveOptions};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

impl GraphState {
    /// Nested view of an entity.
    ///
    /// References to keys the entity owns (its partial keys) are expanded;
    /// with `deep`, every reference is. A key already being expanded further
    /// up the same path stays a bare key, so cycles terminate.
    ///
    /// Returns `None` for an unknown entity unless `safe` is set, in which
    /// case the input is echoed back.
    pub fn resolve<'a>(
        &self,
        target: impl Into<EntityRef<'a>>,
        options: ResolveOptions,
    ) -> Option<Value> {
        let target = target.into();
        let echo = || options.safe.then(|| target.to_value());

        let Some(key) = self.key_of(target) else {
            return echo();
        };
        let Some(record) = self.inner.cache.read_link(&key) else {
            return echo();
        };

        let mut path = Vec::new();
        Some(self.resolve_record(&key, record, options, &mut path))
    }

    /// Resolve with `safe` forced on; never fails to produce a value.
    pub fn safe_resolve<'a>(&self, target: impl Into<EntityRef<'a>>, options: ResolveOptions) -> Value {
        let target = target.into();
        self.resolve(target, ResolveOptions { safe: true, ..options })
            .unwrap_or_else(|| target.to_value())
    }

    /// Resolve and deserialize into `T`.
    pub fn resolve_as<'a, T: DeserializeOwned>(
        &self,
        target: impl Into<EntityRef<'a>>,
        options: ResolveOptions,
    ) -> Result<Option<T>> {
        self.resolve(target, options)
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| GraphError::Deserialization(e.to_string()))
            })
            .transpose()
    }

    fn resolve_record(
        &self,
        key: &str,
        record: Value,
        options: ResolveOptions,
        path: &mut Vec<String>,
    ) -> Value {
        let Value::Object(fields) = record else {
            return record;
        };

        path.push(key.to_string());
        let mut view = Map::with_capacity(fields.len());
        for (field, value) in fields {
            let value = self
                .resolve_value(key, value, options, path)
                .unwrap_or(Value::Null);
            view.insert(field, value);
        }
        path.pop();

        Value::Object(view)
    }

    /// `None` marks a dangling reference to be pruned.
    fn resolve_value(
        &self,
        owner: &str,
        value: Value,
        options: ResolveOptions,
        path: &mut Vec<String>,
    ) -> Option<Value> {
        if self.is_skipped(&value) {
            return Some(value);
        }

        match value {
            Value::String(link) if is_link_key(&link) => self.resolve_link(owner, link, options, path),
            Value::Array(items) => Some(Value::Array(
                items
                    .into_iter()
                    .filter_map(|item| self.resolve_value(owner, item, options, path))
                    .collect(),
            )),
            other => Some(other),
        }
    }

    fn resolve_link(
        &self,
        owner: &str,
        link: String,
        options: ResolveOptions,
        path: &mut Vec<String>,
    ) -> Option<Value> {
        let Some(record) = self.inner.cache.read_link(&link) else {
            return options.safe.then_some(Value::String(link));
        };

        let expand = options.deep
            || (is_owned_by(&link, owner) && self.inner.cache.is_partial(&link));
        if !expand || path.contains(&link) {
            return Some(Value::String(link));
        }
        Some(self.resolve_record(&link, record, options, path))
    }
}

//! Normalizing writes.

use crate::error::Result;
use crate::keys::{is_link_key, is_link_value, join_keys, parse_key, ID_FIELD, TYPE_FIELD};
use crate::store::GraphState;
use crate::types::{
    EntityRef, LinkKey, MutateOptions, NestedWrite, Patch, ReplacePolicy, ResolveOptions,
    WriteStrategy,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// State shared by a top-level mutate and every nested write it triggers.
pub(crate) struct MutateContext<'o> {
    options: &'o MutateOptions,
    has_change: bool,
}

impl GraphState {
    /// Write `patch` into the record of `target`.
    ///
    /// The target is the key itself when given one, the derived key for an
    /// entity, or the root key for an object without identity. Nested
    /// entities, plain objects, and arrays of them are written to their own
    /// records first and replaced by their keys.
    ///
    /// Once the write completes, unreachable records are collected and, if
    /// anything changed, subscribers are notified. Returns the target key,
    /// or `None` for a key string that does not parse.
    pub fn mutate<'a, 'p>(
        &self,
        target: impl Into<EntityRef<'a>>,
        patch: impl Into<Patch<'p>>,
        options: MutateOptions,
    ) -> Result<Option<LinkKey>> {
        let Some(key) = self.target_key(target.into()) else {
            return Ok(None);
        };

        let data = match patch.into() {
            Patch::Data(data) => data,
            Patch::Update(update) => update(self.resolve(&key, ResolveOptions::default())),
        };

        let mut ctx = MutateContext {
            options: &options,
            has_change: false,
        };
        let partial = self.inner.cache.is_partial(&key);
        self.write_record(&key, data, None, partial, &mut ctx)?;
        Ok(Some(key))
    }

    /// Mutate with the entity as its own data.
    pub fn mutate_entity(&self, entity: &Value, options: MutateOptions) -> Result<Option<LinkKey>> {
        self.mutate(entity, entity.clone(), options)
    }

    /// Mutate with any serializable value as data.
    pub fn mutate_serialized<'a, T: Serialize>(
        &self,
        target: impl Into<EntityRef<'a>>,
        data: &T,
        options: MutateOptions,
    ) -> Result<Option<LinkKey>> {
        let data = serde_json::to_value(data)?;
        self.mutate(target, data, options)
    }

    fn target_key(&self, target: EntityRef<'_>) -> Option<LinkKey> {
        match target {
            EntityRef::Key(key) => is_link_key(key).then(|| key.to_string()),
            EntityRef::Object(entity) => Some(
                self.key_of_entity(entity)
                    .unwrap_or_else(|| self.root_key().to_string()),
            ),
        }
    }

    /// Write one record. `parent` is set for nested writes only.
    fn write_record(
        &self,
        key: &str,
        data: Value,
        parent: Option<&str>,
        partial: bool,
        ctx: &mut MutateContext<'_>,
    ) -> Result<()> {
        let cache = &self.inner.cache;
        let top_level = parent.is_none();
        // Rooted before and after the write; a nested record may link back.
        let detached = top_level && !partial && cache.get_parents(key).is_empty();
        if detached {
            cache.add_root(key);
        }
        let previous = cache.read_link(key);
        let previous_view = if top_level {
            self.resolve(key, ResolveOptions::default())
        } else {
            None
        };

        let data = match data {
            Value::String(link) if is_link_key(&link) => {
                self.entity_of_key(&Value::String(link)).unwrap_or_default()
            }
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        if self.is_skipped(&data) || !data.is_object() {
            ctx.has_change |= previous.as_ref() != Some(&data);
            self.store_record(key, data, parent, partial);
            return self.finish_write(key, top_level, detached, previous_view, ctx);
        }

        let mut draft = data;
        if let (Some((type_name, id)), Value::Object(fields)) = (parse_key(key), &mut draft) {
            if !partial {
                fields.insert(TYPE_FIELD.to_string(), Value::String(type_name.to_string()));
                fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            }
        }

        let replace = match &ctx.options.replace {
            ReplacePolicy::Merge => false,
            ReplacePolicy::Replace => top_level || partial,
            ReplacePolicy::Deep => true,
            ReplacePolicy::When(predicate) => predicate(&draft),
        };

        let Value::Object(incoming) = draft else {
            return Ok(());
        };
        let previous_fields = previous.as_ref().and_then(Value::as_object);

        let mut next = match previous_fields {
            Some(fields) if !replace => fields.clone(),
            _ => Map::new(),
        };

        for (field, value) in incoming {
            let previous_value = previous_fields.and_then(|fields| fields.get(&field));
            let value = self.write_field(key, &field, value, previous_value, replace, ctx)?;

            if previous_value != Some(&value) {
                ctx.has_change = true;
            }
            next.insert(field, value);
        }

        if let Some(fields) = previous_fields {
            if fields.keys().any(|field| !next.contains_key(field)) {
                ctx.has_change = true;
            }
        }

        self.store_record(key, Value::Object(next), parent, partial);
        self.finish_write(key, top_level, detached, previous_view, ctx)
    }

    /// Edges follow the stored record, so nothing is unlinked before this.
    fn store_record(&self, key: &str, record: Value, parent: Option<&str>, partial: bool) {
        let cache = &self.inner.cache;
        if partial {
            cache.write_partial(key, record, parent);
        } else {
            cache.write_link(key, record, parent);
        }
    }

    /// Normalize one incoming field of the record at `key`.
    fn write_field(
        &self,
        key: &str,
        field: &str,
        value: Value,
        previous: Option<&Value>,
        replace: bool,
        ctx: &mut MutateContext<'_>,
    ) -> Result<Value> {
        if self.is_skipped(&value) {
            return Ok(value);
        }

        let mut value = if value.is_object() || value.is_array() || is_link_value(&value) {
            self.normalize(value, &join_keys(key, field), key, ctx)?
        } else {
            value
        };

        if let Value::Array(items) = &mut value {
            if let (false, Some(Value::Array(previous_items))) = (replace, previous) {
                let appended = std::mem::take(items);
                items.extend(previous_items.iter().cloned());
                items.extend(appended);
            }
            if ctx.options.dedup {
                dedup(items);
            }
        }
        Ok(value)
    }

    /// Replace nested values by the keys of the records they are written to.
    fn normalize(
        &self,
        value: Value,
        path: &str,
        parent: &str,
        ctx: &mut MutateContext<'_>,
    ) -> Result<Value> {
        if self.is_skipped(&value) {
            return Ok(value);
        }

        match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| self.normalize(item, &join_keys(path, &index.to_string()), parent, ctx))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::String(link) if is_link_key(&link) => {
                let cache = &self.inner.cache;
                if !cache.has_link(&link) && !cache.is_partial(&link) {
                    return self.write_nested(link.clone(), Value::String(link), parent, false, ctx);
                }
                Ok(Value::String(link))
            }
            Value::Object(_) => match self.key_of_entity(&value) {
                Some(key) => self.write_nested(key, value, parent, false, ctx),
                None => self.write_nested(path.to_string(), value, parent, true, ctx),
            },
            other => Ok(other),
        }
    }

    fn write_nested(
        &self,
        key: LinkKey,
        data: Value,
        parent: &str,
        partial: bool,
        ctx: &mut MutateContext<'_>,
    ) -> Result<Value> {
        let options = ctx.options;
        match &options.write {
            WriteStrategy::Normalize => {
                self.write_record(&key, data, Some(parent), partial, ctx)?;
                Ok(Value::String(key))
            }
            WriteStrategy::Custom(write) => {
                let request = NestedWrite {
                    key,
                    parent: parent.to_string(),
                    data,
                    partial,
                };
                Ok(write(self, request)?.map_or(Value::Null, Value::String))
            }
        }
    }

    /// Top-level writes root an unreferenced key, collect garbage once, and
    /// notify once for the whole call.
    fn finish_write(
        &self,
        key: &str,
        top_level: bool,
        detached: bool,
        previous_view: Option<Value>,
        ctx: &MutateContext<'_>,
    ) -> Result<()> {
        if !top_level {
            return Ok(());
        }

        let cache = &self.inner.cache;
        if detached {
            cache.add_root(key);
        }
        cache.run_garbage_collector();

        if ctx.has_change {
            self.notify(key, previous_view.as_ref())?;
        }
        Ok(())
    }
}

/// Collapse equal values, keeping first occurrences in order.
///
/// Strings (keys included) are checked by hash; other values by scan.
fn dedup(items: &mut Vec<Value>) {
    let original = std::mem::take(items);
    let keep: Vec<bool> = {
        let mut seen_strings: HashSet<&str> = HashSet::with_capacity(original.len());
        let mut seen_other: Vec<&Value> = Vec::new();
        original
            .iter()
            .map(|item| match item {
                Value::String(s) => seen_strings.insert(s.as_str()),
                other if seen_other.contains(&other) => false,
                other => {
                    seen_other.push(other);
                    true
                }
            })
            .collect()
    };

    items.extend(
        original
            .into_iter()
            .zip(keep)
            .filter_map(|(item, keep)| keep.then_some(item)),
    );
}

//! Entity identity: mapping between entities and their link keys.
//!
//! A link key is `Type:id`. Nested values without an identity of their own
//! get a partial key, formed by joining the owning key with the field path
//! (`Post:1.comments.0`). Ids may contain `.` themselves (`User:jane.doe`),
//! so a key is only partial if the link cache wrote it as one.

use crate::types::{EntityRef, LinkKey};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Field carrying an entity's type tag.
pub const TYPE_FIELD: &str = "_type";

/// Field carrying the id injected from a key.
pub const ID_FIELD: &str = "_id";

/// Id fields consulted, in order, when no generator is registered.
const ID_FIELDS: [&str; 2] = ["id", ID_FIELD];

const KEY_SEPARATOR: char = ':';
const PATH_SEPARATOR: char = '.';

/// Derives an id for entities of one type.
pub type KeyGenerator = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Split a key into its type and id.
pub fn parse_key(key: &str) -> Option<(&str, &str)> {
    let (type_name, id) = key.split_once(KEY_SEPARATOR)?;
    if !is_type_name(type_name) || id.is_empty() || id.chars().any(char::is_whitespace) {
        return None;
    }
    Some((type_name, id))
}

fn is_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-'))
}

pub fn is_link_key(key: &str) -> bool {
    parse_key(key).is_some()
}

/// Whether a JSON value is a string holding a link key.
pub fn is_link_value(value: &Value) -> bool {
    value.as_str().is_some_and(is_link_key)
}

pub fn type_of_key(key: &str) -> Option<&str> {
    parse_key(key).map(|(type_name, _)| type_name)
}

/// Extend an owner key with one path segment.
pub fn join_keys(owner: &str, segment: &str) -> LinkKey {
    format!("{owner}{PATH_SEPARATOR}{segment}")
}

/// Ownership relation: `key` lies in the subtree normalized from `owner`.
pub fn is_owned_by(key: &str, owner: &str) -> bool {
    key.len() > owner.len()
        && key.starts_with(owner)
        && key[owner.len()..].starts_with(PATH_SEPARATOR)
}

/// Maps entities to keys and back.
#[derive(Clone, Default)]
pub struct KeyResolver {
    generators: HashMap<String, KeyGenerator>,
}

impl KeyResolver {
    pub fn new(generators: HashMap<String, KeyGenerator>) -> Self {
        Self { generators }
    }

    /// Register the id generator for a type, replacing any previous one.
    pub fn register(&mut self, type_name: impl Into<String>, generator: KeyGenerator) {
        self.generators.insert(type_name.into(), generator);
    }

    /// Key of an entity, if one can be derived.
    ///
    /// Strings are accepted when they parse as keys. Objects need a `_type`
    /// and an id from the type's generator, or else from `id` / `_id`.
    pub fn key_of_entity(&self, entity: &Value) -> Option<LinkKey> {
        match entity {
            Value::String(key) => is_link_key(key).then(|| key.clone()),
            Value::Object(fields) => self.key_of_fields(fields),
            _ => None,
        }
    }

    pub fn key_of(&self, entity: EntityRef<'_>) -> Option<LinkKey> {
        match entity {
            EntityRef::Key(key) => is_link_key(key).then(|| key.to_string()),
            EntityRef::Object(value) => self.key_of_entity(value),
        }
    }

    fn key_of_fields(&self, fields: &Map<String, Value>) -> Option<LinkKey> {
        let type_name = fields.get(TYPE_FIELD)?.as_str()?;
        if !is_type_name(type_name) {
            return None;
        }

        let id = match self.generators.get(type_name) {
            Some(generator) => generator(&Value::Object(fields.clone()))?,
            None => ID_FIELDS
                .iter()
                .filter_map(|field| fields.get(*field))
                .find(|value| !value.is_null())
                .and_then(id_string)?,
        };

        let key = format!("{type_name}{KEY_SEPARATOR}{id}");
        is_link_key(&key).then_some(key)
    }

    /// Minimal entity for a key, or the input itself when it already
    /// carries an identity.
    pub fn entity_of_key(&self, entity: &Value) -> Option<Value> {
        match entity {
            Value::Object(fields) => self.key_of_fields(fields).map(|_| entity.clone()),
            Value::String(key) => {
                let (type_name, id) = parse_key(key)?;
                let mut shell = Map::new();
                shell.insert(TYPE_FIELD.to_string(), Value::String(type_name.to_string()));
                shell.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
                Some(Value::Object(shell))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.generators.keys().collect();
        types.sort();
        f.debug_struct("KeyResolver").field("generators", &types).finish()
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

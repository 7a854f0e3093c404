//! Construction input - flat values, nested objects and already-built entities
//!
//! Every field of an [`Input`] is either a raw JSON value or an entity someone already
//! built. Entity constructors read whichever shape is present; nothing is inspected at
//! runtime beyond this tag.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{Entity, FromInput};
use crate::storage::query::join_list;
use crate::storage::Row;
use crate::{Error, Result};

/// One input field
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// A flat value or a nested JSON object / array
    Raw(Value),
    /// A single built entity
    Entity(Entity),
    /// A list of built entities
    Entities(Vec<Entity>),
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Raw(value)
    }
}

impl From<Entity> for Field {
    fn from(entity: Entity) -> Self {
        Field::Entity(entity)
    }
}

impl From<Vec<Entity>> for Field {
    fn from(entities: Vec<Entity>) -> Self {
        Field::Entities(entities)
    }
}

/// Attribute mapping handed to entity constructors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Input(BTreeMap<String, Field>);

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw value (builder style)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), Field::Raw(value.into()));
        self
    }

    /// Add a built entity (builder style)
    pub fn with_entity(mut self, key: impl Into<String>, entity: impl Into<Entity>) -> Self {
        self.0.insert(key.into(), Field::Entity(entity.into()));
        self
    }

    /// Add a list of built entities (builder style)
    pub fn with_entities<E: Into<Entity>>(mut self, key: impl Into<String>, entities: Vec<E>) -> Self {
        let entities = entities.into_iter().map(Into::into).collect();
        self.0.insert(key.into(), Field::Entities(entities));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, field: impl Into<Field>) {
        self.0.insert(key.into(), field.into());
    }

    /// Build from a JSON object; every member becomes a raw field
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(Error::Validation(format!(
                "entity input must be a JSON object, got {}",
                other
            ))),
        }
    }

    pub fn from_map(map: serde_json::Map<String, Value>) -> Self {
        Self(map.into_iter().map(|(k, v)| (k, Field::Raw(v))).collect())
    }

    pub fn from_row(row: &Row) -> Self {
        Self(row.iter().map(|(k, v)| (k.clone(), Field::Raw(v.clone()))).collect())
    }

    pub fn get(&self, key: &str) -> Option<&Field> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// At least one field holds something other than null
    pub fn has_values(&self) -> bool {
        self.0.values().any(|f| !matches!(f, Field::Raw(Value::Null)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Raw value, treating JSON null as absent
    pub fn raw(&self, key: &str) -> Option<&Value> {
        match self.0.get(key) {
            Some(Field::Raw(Value::Null)) | None => None,
            Some(Field::Raw(v)) => Some(v),
            Some(_) => None,
        }
    }

    /// Present and truthy: non-empty text or list, non-zero number, `true`, or any entity
    pub fn is_set(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Field::Raw(Value::Null)) => false,
            Some(Field::Raw(Value::String(s))) => !s.is_empty(),
            Some(Field::Raw(Value::Array(a))) => !a.is_empty(),
            Some(Field::Raw(Value::Object(o))) => !o.is_empty(),
            Some(Field::Raw(Value::Bool(b))) => *b,
            Some(Field::Raw(Value::Number(n))) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Field::Entity(_)) => true,
            Some(Field::Entities(v)) => !v.is_empty(),
        }
    }

    /// Text value; lists are joined with "; "
    pub fn text(&self, key: &str) -> Option<String> {
        match self.raw(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(join_list(items)),
            other => Some(other.to_string()),
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.raw(key)? {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.raw(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.raw(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// JSON value; text holding a JSON object or array is parsed
    pub fn json(&self, key: &str) -> Option<Value> {
        match self.raw(key)? {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ (Value::Object(_) | Value::Array(_))) => Some(parsed),
                _ => Some(Value::String(s.clone())),
            },
            other => Some(other.clone()),
        }
    }

    /// Nested object at `key` as its own input
    pub fn nested(&self, key: &str) -> Option<Input> {
        match self.raw(key)? {
            Value::Object(map) => Some(Self::from_map(map.clone())),
            _ => None,
        }
    }

    /// Fields named `<prefix>_<name>`, renamed to `<name>`
    pub fn prefixed(&self, prefix: &str) -> Input {
        let head = format!("{}_", prefix);
        Self(
            self.0
                .iter()
                .filter_map(|(k, v)| k.strip_prefix(&head).map(|rest| (rest.to_string(), v.clone())))
                .collect(),
        )
    }

    /// Copy without one field
    pub fn without(&self, key: &str) -> Input {
        let mut copy = self.clone();
        copy.0.remove(key);
        copy
    }

    /// A single sub-entity: built, or a nested object
    pub fn one<T: FromInput>(&self, key: &str) -> Result<Option<T>> {
        match self.0.get(key) {
            None | Some(Field::Raw(Value::Null)) => Ok(None),
            Some(Field::Entity(entity)) => extract(key, entity).map(Some),
            Some(Field::Entities(entities)) => match entities.first() {
                Some(entity) => extract(key, entity).map(Some),
                None => Ok(None),
            },
            Some(Field::Raw(Value::Object(map))) => {
                T::from_input(&Self::from_map(map.clone())).map(Some)
            }
            Some(Field::Raw(other)) => Err(Error::Validation(format!(
                "{} must be a {} or an object, got {}",
                key,
                T::KIND,
                other
            ))),
        }
    }

    /// A list of sub-entities: built, nested objects, or a single one of either
    pub fn many<T: FromInput>(&self, key: &str) -> Result<Option<Vec<T>>> {
        match self.0.get(key) {
            None | Some(Field::Raw(Value::Null)) => Ok(None),
            Some(Field::Entity(entity)) => Ok(Some(vec![extract(key, entity)?])),
            Some(Field::Entities(entities)) => entities
                .iter()
                .map(|e| extract(key, e))
                .collect::<Result<Vec<T>>>()
                .map(Some),
            Some(Field::Raw(Value::Object(map))) => {
                Ok(Some(vec![T::from_input(&Self::from_map(map.clone()))?]))
            }
            Some(Field::Raw(Value::Array(items))) => items
                .iter()
                .map(|item| match item {
                    Value::Object(map) => T::from_input(&Self::from_map(map.clone())),
                    other => Err(Error::Validation(format!(
                        "{} entries must be {} objects, got {}",
                        key,
                        T::KIND,
                        other
                    ))),
                })
                .collect::<Result<Vec<T>>>()
                .map(Some),
            Some(Field::Raw(other)) => Err(Error::Validation(format!(
                "{} must be a list of {} objects, got {}",
                key,
                T::KIND,
                other
            ))),
        }
    }
}

fn extract<T: FromInput>(key: &str, entity: &Entity) -> Result<T> {
    T::from_entity(entity).ok_or_else(|| {
        Error::Validation(format!(
            "{} must be a {}, got a {}",
            key,
            T::KIND,
            entity.kind()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Url, Version};
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let input = Input::from_json(json!({
            "id": "12",
            "count": 3.0,
            "flag": 1,
            "text": ["a", "b"],
            "empty": "",
            "meta": "{\"k\": 1}",
            "missing": null
        }))
        .unwrap();

        assert_eq!(input.int("id"), Some(12));
        assert_eq!(input.int("count"), Some(3));
        assert_eq!(input.bool("flag"), Some(true));
        assert_eq!(input.text("text"), Some("a; b".to_string()));
        assert_eq!(input.int("empty"), None);
        assert_eq!(input.json("meta"), Some(json!({"k": 1})));
        assert_eq!(input.raw("missing"), None);
        assert!(!input.is_set("empty"));
        assert!(input.is_set("flag"));
    }

    #[test]
    fn test_prefixed_and_without() {
        let input = Input::new()
            .with("id", 5)
            .with("resource_short_name", "uniprot")
            .with("resource_id", 7)
            .with("version_name", "run");

        let resource = input.prefixed("resource");
        assert_eq!(resource.text("short_name"), Some("uniprot".to_string()));
        assert_eq!(resource.int("id"), Some(7));
        assert_eq!(resource.keys().count(), 2);

        assert_eq!(input.without("id").int("id"), None);
    }

    #[test]
    fn test_one_accepts_built_and_nested() {
        let built = Version {
            id: Some(3),
            ..Version::default()
        };
        let input = Input::new()
            .with_entity("version", built.clone())
            .with("nested", json!({"name": "run", "date": "2024-02-01"}));

        assert_eq!(input.one::<Version>("version").unwrap(), Some(built));
        let nested = input.one::<Version>("nested").unwrap().unwrap();
        assert_eq!(nested.name.as_deref(), Some("run"));
        assert_eq!(input.one::<Version>("absent").unwrap(), None);
    }

    #[test]
    fn test_wrong_entity_kind_is_rejected() {
        let input = Input::new().with_entity("version", Url::default());
        assert!(matches!(input.one::<Version>("version"), Err(Error::Validation(_))));
        let input = Input::new().with("version", 42);
        assert!(input.one::<Version>("version").is_err());
    }

    #[test]
    fn test_many_from_array() {
        let input = Input::new().with("versions", json!([{"name": "a"}, {"name": "b"}]));
        let versions = input.many::<Version>("versions").unwrap().unwrap();
        assert_eq!(versions.len(), 2);
        let bad = Input::new().with("versions", json!(["a"]));
        assert!(bad.many::<Version>("versions").is_err());
    }

    #[test]
    fn test_from_json_rejects_non_objects() {
        assert!(Input::from_json(json!([1, 2])).is_err());
    }
}

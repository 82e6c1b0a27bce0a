//! Objects and object sets.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
}

impl Value {
    /// Orders two values of the same kind. Mixed kinds are unordered.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Identity of an object: `(object_type, primary_key)`.
pub type ObjectKey = (String, String);

/// A stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Type name; must be in the schema.
    pub object_type: String,
    /// Primary key, unique within the type.
    pub primary_key: String,
    /// Named field values.
    pub fields: BTreeMap<String, Value>,
}

impl Object {
    /// Creates an object without fields.
    pub fn new(object_type: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            primary_key: primary_key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field and returns the object.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns a field value; missing fields read as [`Value::Null`].
    #[must_use]
    pub fn field(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(name).unwrap_or(&NULL)
    }

    /// Returns the object's key.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        (self.object_type.clone(), self.primary_key.clone())
    }
}

/// Objects ordered by `(object_type, primary_key)`.
///
/// Serialized as a plain sequence of objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Object>", into = "Vec<Object>")]
pub struct ObjectSet {
    objects: BTreeMap<ObjectKey, Object>,
}

impl ObjectSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an object. Returns the previous one.
    pub fn insert(&mut self, object: Object) -> Option<Object> {
        self.objects.insert(object.key(), object)
    }

    /// Removes an object.
    pub fn remove(&mut self, object_type: &str, primary_key: &str) -> Option<Object> {
        self.objects
            .remove(&(object_type.to_string(), primary_key.to_string()))
    }

    /// Looks up an object.
    #[must_use]
    pub fn get(&self, object_type: &str, primary_key: &str) -> Option<&Object> {
        self.objects
            .get(&(object_type.to_string(), primary_key.to_string()))
    }

    /// Iterates over all objects.
    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    /// Iterates over the objects of one type.
    pub fn of_type<'a>(&'a self, object_type: &'a str) -> impl Iterator<Item = &'a Object> + 'a {
        self.objects
            .values()
            .filter(move |o| o.object_type == object_type)
    }

    /// Returns the number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if there are no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl From<Vec<Object>> for ObjectSet {
    fn from(objects: Vec<Object>) -> Self {
        objects.into_iter().collect()
    }
}

impl From<ObjectSet> for Vec<Object> {
    fn from(set: ObjectSet) -> Self {
        set.objects.into_values().collect()
    }
}

impl FromIterator<Object> for ObjectSet {
    fn from_iter<I: IntoIterator<Item = Object>>(iter: I) -> Self {
        let mut set = ObjectSet::new();
        for object in iter {
            set.insert(object);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_null() {
        let dog = Object::new("Dog", "1").with("name", "Rex");
        assert_eq!(dog.field("name"), &Value::from("Rex"));
        assert_eq!(dog.field("age"), &Value::Null);
    }

    #[test]
    fn mixed_kinds_do_not_compare() {
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
    }

    #[test]
    fn insert_replaces_by_key() {
        let mut set = ObjectSet::new();
        assert!(set.insert(Object::new("Dog", "1").with("age", 1)).is_none());
        let previous = set.insert(Object::new("Dog", "1").with("age", 2));
        assert_eq!(previous.map(|o| o.fields["age"].clone()), Some(Value::Int(1)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn of_type_filters() {
        let set: ObjectSet = vec![
            Object::new("Dog", "1"),
            Object::new("Cat", "1"),
            Object::new("Dog", "2"),
        ]
        .into();
        assert_eq!(set.of_type("Dog").count(), 2);
        assert_eq!(set.of_type("Bird").count(), 0);
    }

    #[test]
    fn object_set_survives_cbor() {
        let set: ObjectSet = vec![Object::new("Dog", "1").with("age", 3)].into();
        let bytes = crate::to_cbor(&set).unwrap();
        let back: ObjectSet = crate::from_cbor(&bytes).unwrap();
        assert_eq!(back, set);
    }
}

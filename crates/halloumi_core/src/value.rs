//! Resolved property values and reference expressions.
//!
//! A [`Value`] is what a configuration block produces: a scalar, a structured
//! literal, or a reference expression pointing at another resource instance.
//! Serialization produces the CloudFormation JSON shape directly, so the
//! emitter never has to inspect values again.

use crate::id::LogicalId;
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A resolved property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean literal
    Bool(bool),
    /// Integer literal
    Integer(i64),
    /// Floating point literal
    Float(f64),
    /// String literal
    String(String),
    /// Ordered sequence
    List(Vec<Value>),
    /// Structured literal; keys are emitted verbatim
    Map(IndexMap<String, Value>),
    /// `{"Ref": "<LogicalId>"}`
    Ref(LogicalId),
    /// `{"Fn::GetAtt": ["<LogicalId>", "<Attribute>"]}`
    GetAtt {
        /// Referenced instance
        id: LogicalId,
        /// Provider attribute name
        attribute: String,
    },
}

impl Value {
    /// Build a structured literal from key/value pairs. Keys keep their order
    /// in memory and are emitted sorted.
    #[must_use]
    pub fn object<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a sequence from anything convertible into values
    #[must_use]
    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Plain reference to a logical id
    #[must_use]
    pub fn reference(id: impl Into<LogicalId>) -> Self {
        Self::Ref(id.into())
    }

    /// Attribute reference to a logical id
    #[must_use]
    pub fn get_att(id: impl Into<LogicalId>, attribute: impl Into<String>) -> Self {
        Self::GetAtt {
            id: id.into(),
            attribute: attribute.into(),
        }
    }

    /// Check for [`Value::Null`]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get as string slice if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as integer, parsing numeric strings
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get as boolean if this is a boolean
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as slice if this is a sequence
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Collect every logical id referenced anywhere inside this value
    #[must_use]
    pub fn references(&self) -> Vec<&LogicalId> {
        let mut found = Vec::new();
        self.collect_references(&mut found);
        found
    }

    fn collect_references<'a>(&'a self, found: &mut Vec<&'a LogicalId>) {
        match self {
            Self::Ref(id) | Self::GetAtt { id, .. } => found.push(id),
            Self::List(items) => {
                for item in items {
                    item.collect_references(found);
                }
            }
            Self::Map(entries) => {
                for item in entries.values() {
                    item.collect_references(found);
                }
            }
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) | Self::String(_) => {}
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                // Emitted with sorted keys; construction order is kept in memory
                let mut sorted: Vec<_> = entries.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(b.0));
                let mut map = serializer.serialize_map(Some(sorted.len()))?;
                for (key, value) in sorted {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Self::Ref(id) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Ref", id)?;
                map.end()
            }
            Self::GetAtt { id, attribute } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("Fn::GetAtt", &(id, attribute))?;
                map.end()
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        i64::try_from(i).map_or(Self::Float(i as f64), Self::Integer)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Self::list(items)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Into::into).collect()),
            serde_json::Value::Object(entries) => {
                Self::Map(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ref_serialization() {
        let value = Value::reference("Vpc");
        assert_eq!(serde_json::to_value(&value).unwrap(), json!({"Ref": "Vpc"}));
    }

    #[test]
    fn test_get_att_serialization() {
        let value = Value::get_att("Role", "Arn");
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"Fn::GetAtt": ["Role", "Arn"]})
        );
    }

    #[test]
    fn test_structured_literal_keeps_keys_and_sequence_order() {
        let value = Value::object([
            ("Fn::Select", Value::list([Value::from(2), Value::object([("Fn::GetAZs", "")])])),
        ]);
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"Fn::Select": [2, {"Fn::GetAZs": ""}]})
        );
    }

    #[test]
    fn test_references_walks_nested_values() {
        let value = Value::list([
            Value::object([("Arn", Value::get_att("Function", "Arn"))]),
            Value::reference("Topic"),
            Value::from("Topic"),
        ]);
        let ids: Vec<&str> = value.references().iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["Function", "Topic"]);
    }

    #[test]
    fn test_map_keys_serialize_sorted() {
        let value = Value::object([
            ("S3Key", Value::from("function.zip")),
            ("S3Bucket", Value::from("artifacts")),
        ]);
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"S3Bucket":"artifacts","S3Key":"function.zip"}"#
        );
    }

    #[test]
    fn test_from_json() {
        let value = Value::from(json!({"Version": "2012-10-17", "Count": 3}));
        let Value::Map(entries) = value else {
            panic!("expected map");
        };
        assert_eq!(entries["Version"], Value::from("2012-10-17"));
        assert_eq!(entries["Count"], Value::Integer(3));
    }

    #[test]
    fn test_as_i64_parses_strings() {
        assert_eq!(Value::from("128").as_i64(), Some(128));
        assert_eq!(Value::Integer(7).as_i64(), Some(7));
        assert_eq!(Value::from("abc").as_i64(), None);
    }
}

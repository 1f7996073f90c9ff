//! Dynamically typed values carried by intents and interface calls.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Named parameters of an intent request or reply.
pub type ParameterMap = BTreeMap<String, Value>;

/// A dynamically typed value.
///
/// Serializes to plain JSON: integers stay integers, floats stay floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
}

/// Type tag used by interface schemas to describe an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// [`Value::Int`].
    Int,
    /// [`Value::Bool`].
    Bool,
    /// [`Value::Double`], also accepting integers.
    Double,
    /// [`Value::String`].
    String,
    /// Anything.
    Variant,
}

impl Value {
    /// Whether the value counts as "empty": null, empty string, empty list or
    /// empty map.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Map(m) => m.is_empty(),
            Self::Bool(_) | Self::Int(_) | Self::Double(_) => false,
        }
    }

    /// Whether this value is acceptable where `kind` is declared.
    #[must_use]
    pub fn conforms_to(&self, kind: ValueKind) -> bool {
        match kind {
            ValueKind::Variant => true,
            ValueKind::Int => matches!(self, Self::Int(_)),
            ValueKind::Bool => matches!(self, Self::Bool(_)),
            ValueKind::Double => matches!(self, Self::Double(_) | Self::Int(_)),
            ValueKind::String => matches!(self, Self::String(_)),
        }
    }

    /// Borrow the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Map payload, if any.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Double => "double",
            Self::String => "string",
            Self::Variant => "variant",
        };
        f.write_str(name)
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

impl From<ParameterMap> for Value {
    fn from(m: ParameterMap) -> Self {
        Self::Map(m)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_keeps_numeric_kinds() {
        let v: Value = serde_json::from_str(r#"{"a": 1, "b": 1.5, "c": [true, null]}"#).unwrap();
        let map = v.as_map().unwrap();
        assert_eq!(map["a"], Value::Int(1));
        assert_eq!(map["b"], Value::Double(1.5));
        assert_eq!(map["c"], Value::List(vec![Value::Bool(true), Value::Null]));
    }

    #[test]
    fn test_emptiness() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(Value::List(vec![]).is_empty());
        assert!(!Value::Int(0).is_empty());
        assert!(!Value::from("x").is_empty());
    }

    #[test]
    fn test_conformance() {
        assert!(Value::Int(3).conforms_to(ValueKind::Double));
        assert!(!Value::Double(3.0).conforms_to(ValueKind::Int));
        assert!(Value::Null.conforms_to(ValueKind::Variant));
        assert!(!Value::Null.conforms_to(ValueKind::String));
    }
}

//! Dynamically typed attribute values.
//!
//! Hosts can carry attributes of any type, but querying is limited to
//! strings, booleans, numbers, null, and lists of those. JSON numbers are
//! normalised on ingest: integral numbers become signed integers, everything
//! else becomes a float.

use serde::{Deserialize, Serialize};

/// An attribute value as stored on a host.
///
/// The untagged representation means JSON attribute bags deserialize
/// directly into this type; serde tries `Int` before `Float`, which gives
/// integral JSON numbers the integer preference the match logic relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer (preferred for integral JSON numbers)
    Int(i64),
    /// Floating point
    Float(f64),
    /// String
    String(String),
    /// Homogeneous list of scalars
    List(Vec<Value>),
}

impl Value {
    /// Lossy coercion to a string, used by sorting and fuzzy comparisons.
    ///
    /// Lists cannot be coerced; comparisons that hit one are skipped rather
    /// than treated as inequality.
    pub fn coerce_str(&self) -> Option<String> {
        match self {
            Value::Null => Some(String::new()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::List(_) => None,
        }
    }

    /// Returns true for the list variant.
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::String).collect())
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

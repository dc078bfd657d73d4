//! Scalar and list values used in conditions and tag sets.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TsdbError};

/// A condition operand or tag value.
///
/// Tags are always compared as strings; [`Value::to_tag_string`] performs the
/// coercion (`true` → `"1"`, `false` and null → `""`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
}

impl Value {
    /// Returns true for every variant except [`Value::List`].
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_))
    }

    /// Coerces a scalar into the string form used for tag matching.
    ///
    /// # Errors
    ///
    /// Returns a tag resolution error for lists, which have no single string form.
    pub fn to_tag_string(&self) -> Result<String> {
        match self {
            Value::Null => Ok(String::new()),
            Value::Bool(true) => Ok("1".to_string()),
            Value::Bool(false) => Ok(String::new()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::String(s) => Ok(s.clone()),
            Value::List(items) => Err(TsdbError::tag_resolution(format!(
                "non-scalar tag value {items:?} cannot be encoded"
            ))),
        }
    }

    /// Returns the members of a list, or the value itself as a one-element slice.
    pub fn members(&self) -> &[Value] {
        match self {
            Value::List(items) => items,
            scalar => std::slice::from_ref(scalar),
        }
    }

    /// Numeric view of the value; strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// String view of the value without coercion.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
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
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

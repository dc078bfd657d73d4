//! Data points written through a driver.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TsdbError};

/// A typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl FieldValue {
    /// Numeric view used by backends that only store numbers.
    ///
    /// Booleans map to `1.0`/`0.0`; strings have no numeric view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::String(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

/// A single measurement sample with its tags and fields.
///
/// # Example
///
/// ```rust
/// use tsbridge::model::DataPoint;
///
/// let point = DataPoint::new("cpu_usage")
///     .tag("host", "server1")
///     .field("value", 0.64);
/// assert_eq!(point.tags()["host"], "server1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    measurement: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl DataPoint {
    /// Creates a point without tags, fields or timestamp.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Adds or replaces a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds or replaces a field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Sets the sample time. Points without a timestamp are stamped by the backend.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Tags sorted by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Fields sorted by key.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Checks the point can be written at all.
    pub fn validate(&self) -> Result<()> {
        if self.measurement.trim().is_empty() {
            return Err(TsdbError::invalid_query(
                "Measurement cannot be empty",
                "data point",
            ));
        }
        if self.fields.is_empty() {
            return Err(TsdbError::invalid_query(
                "Data point needs at least one field",
                format!("measurement: {}", self.measurement),
            ));
        }
        Ok(())
    }
}

//! Normalized query results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One sample of a result series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeValue {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub value: f64,
}

impl TimeValue {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A named, time-ordered sequence of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Field name or alias the series was produced for.
    pub name: String,
    pub points: Vec<TimeValue>,
}

/// Result of executing a query against one backend.
///
/// Series keep the order in which the backend returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    series: Vec<Series>,
    metadata: BTreeMap<String, String>,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample to the named series, creating it on first use.
    pub fn push(&mut self, name: &str, point: TimeValue) {
        match self.series.iter_mut().find(|s| s.name == name) {
            Some(series) => series.points.push(point),
            None => self.series.push(Series {
                name: name.to_string(),
                points: vec![point],
            }),
        }
    }

    /// Adds an empty series if it does not exist yet.
    pub fn ensure_series(&mut self, name: &str) {
        if self.series(name).is_none() {
            self.series.push(Series {
                name: name.to_string(),
                points: Vec::new(),
            });
        }
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Looks up a series by field or alias.
    pub fn series(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn all_series(&self) -> &[Series] {
        &self.series
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// True when no series carries any sample.
    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.points.is_empty())
    }

    /// Total number of samples across all series.
    pub fn len(&self) -> usize {
        self.series.iter().map(|s| s.points.len()).sum()
    }
}

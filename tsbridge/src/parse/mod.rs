//! Decoding of backend responses into [`QueryResult`].
//!
//! Every decoder normalizes timestamps to Unix seconds and names each series
//! after the field or alias it carries. Bodies that cannot be decoded fail
//! with [`TsdbError::Parse`](crate::error::TsdbError::Parse).

use crate::error::Result;
use crate::model::QueryResult;

pub mod flux_csv;
pub mod graphite;
pub mod influxql;
pub mod prometheus;
pub mod rrd;

/// Wire format of a query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Flux annotated CSV.
    FluxCsv,
    /// InfluxQL `/query` JSON.
    InfluxQlJson,
    /// Prometheus HTTP API JSON.
    PrometheusJson,
    /// Graphite `/render?format=json`.
    GraphiteJson,
    /// `rrdtool xport --json`.
    RrdXportJson,
}

impl ResponseFormat {
    pub fn parse(&self, body: &str) -> Result<QueryResult> {
        match self {
            ResponseFormat::FluxCsv => flux_csv::parse(body),
            ResponseFormat::InfluxQlJson => influxql::parse(body),
            ResponseFormat::PrometheusJson => prometheus::parse(body),
            ResponseFormat::GraphiteJson => graphite::parse(body),
            ResponseFormat::RrdXportJson => rrd::parse(body),
        }
    }
}

/// An empty body means "no data" for every backend.
pub(crate) fn is_blank(body: &str) -> bool {
    body.trim().is_empty()
}

/// Reads a sample value that may arrive as a JSON number or a string.
pub(crate) fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

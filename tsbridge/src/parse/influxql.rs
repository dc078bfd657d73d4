//! InfluxQL `/query` JSON.
//!
//! Each value column other than `time` becomes a series named after the
//! column (`mean`, `max_usage`, ...).

use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{is_blank, json_number};
use crate::error::{Result, TsdbError};
use crate::model::{QueryResult, TimeValue};

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<RawSeries>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSeries {
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<JsonValue>>,
}

pub fn parse(body: &str) -> Result<QueryResult> {
    if is_blank(body) {
        return Ok(QueryResult::new());
    }
    let response: Response = serde_json::from_str(body)
        .map_err(|e| TsdbError::Parse(format!("invalid InfluxQL response: {e}")))?;
    if let Some(error) = response.error {
        return Err(TsdbError::Parse(format!("influxdb error: {error}")));
    }

    let mut result = QueryResult::new();
    for statement in response.results {
        if let Some(error) = statement.error {
            return Err(TsdbError::Parse(format!("influxdb error: {error}")));
        }
        for series in statement.series {
            result.insert_metadata("measurement", series.name.clone());
            let time_at = series
                .columns
                .iter()
                .position(|c| c == "time")
                .ok_or_else(|| {
                    TsdbError::Parse(format!("series '{}' has no time column", series.name))
                })?;

            for row in &series.values {
                let timestamp = row.get(time_at).map(timestamp).transpose()?.ok_or_else(|| {
                    TsdbError::Parse(format!("row of '{}' has no time value", series.name))
                })?;
                for (i, column) in series.columns.iter().enumerate() {
                    if i == time_at {
                        continue;
                    }
                    match row.get(i).and_then(json_number) {
                        Some(value) => result.push(column, TimeValue::new(timestamp, value)),
                        None => result.ensure_series(column),
                    }
                }
            }
        }
    }
    Ok(result)
}

/// RFC 3339 strings by default, epoch seconds with `epoch=s`.
fn timestamp(value: &JsonValue) -> Result<i64> {
    match value {
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp())
            .map_err(|e| TsdbError::Parse(format!("invalid time '{s}': {e}"))),
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| TsdbError::Parse(format!("invalid epoch '{n}'"))),
        other => Err(TsdbError::Parse(format!("invalid time value {other}"))),
    }
}

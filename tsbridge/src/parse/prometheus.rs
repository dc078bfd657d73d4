//! Prometheus HTTP API JSON (`/api/v1/query` and `/api/v1/query_range`).
//!
//! Series are named by `__name__` plus their remaining labels in
//! selector form, e.g. `cpu{host="a"}`.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{is_blank, json_number};
use crate::error::{Result, TsdbError};
use crate::model::{QueryResult, TimeValue};

#[derive(Debug, Deserialize)]
struct Response {
    status: String,
    #[serde(default)]
    data: Option<Data>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum Data {
    Matrix(Vec<RangeSeries>),
    Vector(Vec<InstantSample>),
    Scalar(Vec<JsonValue>),
    String(Vec<JsonValue>),
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    metric: serde_json::Map<String, JsonValue>,
    #[serde(default)]
    values: Vec<(JsonValue, JsonValue)>,
}

#[derive(Debug, Deserialize)]
struct InstantSample {
    #[serde(default)]
    metric: serde_json::Map<String, JsonValue>,
    value: (JsonValue, JsonValue),
}

pub fn parse(body: &str) -> Result<QueryResult> {
    if is_blank(body) {
        return Ok(QueryResult::new());
    }
    let response: Response = serde_json::from_str(body)
        .map_err(|e| TsdbError::Parse(format!("invalid Prometheus response: {e}")))?;
    if response.status != "success" {
        return Err(TsdbError::Parse(format!(
            "prometheus error: {}",
            response.error.unwrap_or(response.status)
        )));
    }

    let mut result = QueryResult::new();
    match response.data {
        None => {}
        Some(Data::Matrix(series)) => {
            result.insert_metadata("result_type", "matrix");
            for s in series {
                let name = series_name(&s.metric);
                result.ensure_series(&name);
                for sample in &s.values {
                    result.push(&name, sample_value(sample)?);
                }
            }
        }
        Some(Data::Vector(samples)) => {
            result.insert_metadata("result_type", "vector");
            for s in samples {
                result.push(&series_name(&s.metric), sample_value(&s.value)?);
            }
        }
        Some(Data::Scalar(pair)) => {
            result.insert_metadata("result_type", "scalar");
            if let [ts, value] = pair.as_slice() {
                result.push("scalar", sample_value(&(ts.clone(), value.clone()))?);
            }
        }
        Some(Data::String(_)) => {
            return Err(TsdbError::Parse("string results carry no samples".into()));
        }
    }
    Ok(result)
}

fn series_name(metric: &serde_json::Map<String, JsonValue>) -> String {
    let name = metric
        .get("__name__")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    let labels: Vec<String> = metric
        .iter()
        .filter(|(k, _)| k.as_str() != "__name__")
        .map(|(k, v)| format!("{k}=\"{}\"", v.as_str().unwrap_or_default()))
        .collect();
    if labels.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{}}}", labels.join(","))
    }
}

/// `[<unix seconds, fractional>, "<value>"]`
fn sample_value((ts, value): &(JsonValue, JsonValue)) -> Result<TimeValue> {
    let timestamp = ts
        .as_f64()
        .ok_or_else(|| TsdbError::Parse(format!("invalid sample timestamp {ts}")))?;
    let value = json_number(value)
        .ok_or_else(|| TsdbError::Parse(format!("invalid sample value {value}")))?;
    Ok(TimeValue::new(timestamp.floor() as i64, value))
}

//! Graphite `/render?format=json`.
//!
//! `[{"target": "cpu.web1.user", "datapoints": [[0.5, 1704067200], [null, 1704067260]]}]`

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{is_blank, json_number};
use crate::error::{Result, TsdbError};
use crate::model::{QueryResult, TimeValue};

#[derive(Debug, Deserialize)]
struct Target {
    target: String,
    #[serde(default)]
    datapoints: Vec<(JsonValue, JsonValue)>,
}

/// Null datapoints are gaps and are skipped.
pub fn parse(body: &str) -> Result<QueryResult> {
    if is_blank(body) {
        return Ok(QueryResult::new());
    }
    let targets: Vec<Target> = serde_json::from_str(body)
        .map_err(|e| TsdbError::Parse(format!("invalid Graphite response: {e}")))?;

    let mut result = QueryResult::new();
    for target in targets {
        result.ensure_series(&target.target);
        for (value, ts) in &target.datapoints {
            let Some(value) = json_number(value) else {
                continue;
            };
            let timestamp = ts
                .as_i64()
                .ok_or_else(|| TsdbError::Parse(format!("invalid datapoint timestamp {ts}")))?;
            result.push(&target.target, TimeValue::new(timestamp, value));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nulls_skipped() {
        let body = r#"[{"target":"cpu.server1","datapoints":[[0.5,1704067200],[null,1704067260],[0.7,1704067320]]}]"#;
        let result = parse(body).unwrap();
        let points = &result.series("cpu.server1").unwrap().points;
        assert_eq!(
            points,
            &vec![
                TimeValue::new(1704067200, 0.5),
                TimeValue::new(1704067320, 0.7)
            ]
        );
    }

    #[test]
    fn test_all_null_target_kept_empty() {
        let result = parse(r#"[{"target":"a","datapoints":[[null,1]]}]"#).unwrap();
        assert!(result.series("a").is_some());
        assert!(result.is_empty());
    }

    #[test]
    fn test_invalid_body() {
        assert!(matches!(parse("{\"error\":1}"), Err(TsdbError::Parse(_))));
    }
}

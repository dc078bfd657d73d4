//! `rrdtool xport --json`.
//!
//! Row `i` of `data` is sampled at `meta.start + i * meta.step`; column `j`
//! belongs to the series named by `meta.legend[j]`.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{is_blank, json_number};
use crate::error::{Result, TsdbError};
use crate::model::{QueryResult, TimeValue};

#[derive(Debug, Deserialize)]
struct Xport {
    meta: Meta,
    #[serde(default)]
    data: Vec<Vec<JsonValue>>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    start: i64,
    step: i64,
    #[serde(default)]
    end: Option<i64>,
    #[serde(default)]
    legend: Vec<String>,
}

/// Unknown (`null`/NaN) cells are skipped.
pub fn parse(body: &str) -> Result<QueryResult> {
    if is_blank(body) {
        return Ok(QueryResult::new());
    }
    let xport: Xport = serde_json::from_str(body)
        .map_err(|e| TsdbError::Parse(format!("invalid xport response: {e}")))?;
    if xport.meta.step <= 0 {
        return Err(TsdbError::Parse(format!(
            "invalid xport step {}",
            xport.meta.step
        )));
    }

    let mut result = QueryResult::new()
        .with_metadata("start", xport.meta.start.to_string())
        .with_metadata("step", xport.meta.step.to_string());
    if let Some(end) = xport.meta.end {
        result.insert_metadata("end", end.to_string());
    }
    for legend in &xport.meta.legend {
        result.ensure_series(legend);
    }

    for (i, row) in xport.data.iter().enumerate() {
        let timestamp = xport.meta.start + i as i64 * xport.meta.step;
        for (j, cell) in row.iter().enumerate() {
            let Some(legend) = xport.meta.legend.get(j) else {
                return Err(TsdbError::Parse(format!(
                    "xport row {i} has {} columns but only {} legends",
                    row.len(),
                    xport.meta.legend.len()
                )));
            };
            if let Some(value) = json_number(cell).filter(|v| !v.is_nan()) {
                result.push(legend, TimeValue::new(timestamp, value));
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_use_start_and_step() {
        let body = r#"{"meta":{"start":1704067200,"step":300,"end":1704067800,"legend":["value","avg_value"]},
            "data":[[1.0,null],[2.0,1.5],[null,null]]}"#;
        let result = parse(body).unwrap();
        assert_eq!(
            result.series("value").unwrap().points,
            vec![
                TimeValue::new(1704067200, 1.0),
                TimeValue::new(1704067500, 2.0)
            ]
        );
        assert_eq!(
            result.series("avg_value").unwrap().points,
            vec![TimeValue::new(1704067500, 1.5)]
        );
        assert_eq!(result.metadata()["end"], "1704067800");
    }

    #[test]
    fn test_extra_columns_rejected() {
        let body = r#"{"meta":{"start":0,"step":60,"legend":["a"]},"data":[[1,2]]}"#;
        assert!(matches!(parse(body), Err(TsdbError::Parse(_))));
    }

    #[test]
    fn test_zero_step_rejected() {
        let body = r#"{"meta":{"start":0,"step":0,"legend":[]},"data":[]}"#;
        assert!(parse(body).is_err());
    }
}

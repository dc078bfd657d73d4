//! Flux annotated CSV.
//!
//! ```text
//! #datatype,string,long,dateTime:RFC3339,double,string
//! ,result,table,_time,_value,_field
//! ,_result,0,2024-01-01T00:00:00Z,0.5,usage
//! ```
//!
//! Annotation rows start with `#`; a blank line ends a table and the next
//! row is a new header. Rows with `_value` are named by their `_field`
//! column; after a `rename()` the value sits in the alias column instead.

use chrono::DateTime;
use tracing::trace;

use super::is_blank;
use crate::error::{Result, TsdbError};
use crate::model::{QueryResult, TimeValue};
use crate::query::DEFAULT_FIELD;

/// Columns that never carry a sample value.
const SYSTEM_COLUMNS: &[&str] = &[
    "",
    "result",
    "table",
    "_start",
    "_stop",
    "_time",
    "_field",
    "_measurement",
];

pub fn parse(body: &str) -> Result<QueryResult> {
    let mut result = QueryResult::new();
    if is_blank(body) {
        return Ok(result);
    }

    let mut header: Option<Vec<String>> = None;
    for (number, line) in body.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let cells = split_row(line).map_err(|e| {
            TsdbError::Parse(format!("flux csv line {}: {e}", number + 1))
        })?;

        let Some(columns) = header.as_ref() else {
            header = Some(cells);
            continue;
        };
        // error tables carry `error` and `reference` columns
        if let Some(at) = columns.iter().position(|c| c == "error") {
            if let Some(message) = cells.get(at).filter(|m| !m.is_empty()) {
                return Err(TsdbError::Parse(format!("flux error: {message}")));
            }
        }
        read_row(columns, &cells, &mut result)?;
    }
    Ok(result)
}

fn read_row(columns: &[String], cells: &[String], result: &mut QueryResult) -> Result<()> {
    let cell = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| cells.get(i))
            .map(String::as_str)
    };

    let Some(time) = cell("_time").or_else(|| cell("_stop")) else {
        trace!("flux row without _time, skipping");
        return Ok(());
    };
    let timestamp = DateTime::parse_from_rfc3339(time)
        .map_err(|e| TsdbError::Parse(format!("invalid _time '{time}': {e}")))?
        .timestamp();

    if let Some(raw) = cell("_value") {
        let name = cell("_field").filter(|f| !f.is_empty()).unwrap_or(DEFAULT_FIELD);
        match raw.parse::<f64>() {
            Ok(value) => result.push(name, TimeValue::new(timestamp, value)),
            Err(_) if raw.is_empty() => result.ensure_series(name),
            Err(_) => trace!(field = %name, "non-numeric flux value skipped"),
        }
        return Ok(());
    }

    for (column, raw) in columns.iter().zip(cells) {
        if SYSTEM_COLUMNS.contains(&column.as_str()) {
            continue;
        }
        if let Ok(value) = raw.parse::<f64>() {
            result.push(column, TimeValue::new(timestamp, value));
        }
    }
    Ok(())
}

/// Splits one CSV row, honoring double-quoted cells with `""` escapes.
fn split_row(line: &str) -> std::result::Result<Vec<String>, &'static str> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if current.is_empty() => quoted = true,
            (',', false) => cells.push(std::mem::take(&mut current)),
            (c, _) => current.push(c),
        }
    }
    if quoted {
        return Err("unterminated quoted cell");
    }
    cells.push(current);
    Ok(cells)
}

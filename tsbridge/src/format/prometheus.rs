//! Prometheus text exposition format, as accepted by the Pushgateway.

use std::collections::BTreeSet;

use tracing::trace;

use crate::error::Result;
use crate::model::DataPoint;
use crate::query::DEFAULT_FIELD;

/// Encodes points as gauges.
///
/// The metric name is the measurement for the `value` field and
/// `<measurement>_<field>` for any other field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpositionEncoder;

impl ExpositionEncoder {
    pub fn encode_batch(&self, points: &[DataPoint]) -> Result<String> {
        let mut typed = BTreeSet::new();
        let mut out = String::new();
        for point in points {
            point.validate()?;
            let labels = labels(point);
            for (field, value) in point.fields() {
                let Some(number) = value.as_f64() else {
                    trace!(field = %field, "exposition format has no string samples, skipping");
                    continue;
                };
                let name = metric_name(point.measurement(), field);
                if typed.insert(name.clone()) {
                    out.push_str(&format!("# TYPE {name} gauge\n"));
                }
                out.push_str(&format!("{name}{labels} {number}\n"));
            }
        }
        Ok(out)
    }
}

pub fn metric_name(measurement: &str, field: &str) -> String {
    let raw = if field == DEFAULT_FIELD {
        measurement.to_string()
    } else {
        format!("{measurement}_{field}")
    };
    sanitize(&raw, true)
}

fn labels(point: &DataPoint) -> String {
    if point.tags().is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = point
        .tags()
        .iter()
        .map(|(k, v)| {
            let value = v
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n");
            format!("{}=\"{value}\"", sanitize(k, false))
        })
        .collect();
    format!("{{{}}}", pairs.join(","))
}

/// Replaces characters outside `[a-zA-Z0-9_]` (plus `:` for metric names).
fn sanitize(raw: &str, allow_colon: bool) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_colon && c == ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

//! Graphite plaintext protocol: `<path> <value> <epoch>` per line.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::error::Result;
use crate::model::DataPoint;

/// Encodes points as `<prefix>.<measurement>.<tag values by key>.<field>`.
#[derive(Debug, Clone, Default)]
pub struct GraphiteEncoder {
    prefix: Option<String>,
}

impl GraphiteEncoder {
    pub fn new(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    /// One line per numeric or boolean field; string fields are skipped.
    ///
    /// Points without a timestamp are stamped with `now`.
    pub fn encode(&self, point: &DataPoint, now: DateTime<Utc>) -> Result<Vec<String>> {
        point.validate()?;

        let mut base: Vec<String> = self.prefix.iter().cloned().collect();
        base.push(path_node(point.measurement()));
        // BTreeMap iteration is sorted by key
        base.extend(point.tags().values().map(|v| path_node(v)));

        let epoch = point.time().unwrap_or(now).timestamp();
        let mut lines = Vec::new();
        for (field, value) in point.fields() {
            let Some(number) = value.as_f64() else {
                trace!(field = %field, "Graphite stores numbers only, skipping field");
                continue;
            };
            lines.push(format!(
                "{}.{} {number} {epoch}",
                base.join("."),
                path_node(field)
            ));
        }
        Ok(lines)
    }

    /// Newline-terminated payload for a batch.
    pub fn encode_batch(&self, points: &[DataPoint], now: DateTime<Utc>) -> Result<String> {
        let mut payload = String::new();
        for point in points {
            for line in self.encode(point, now)? {
                payload.push_str(&line);
                payload.push('\n');
            }
        }
        Ok(payload)
    }
}

/// Dots and whitespace would split or break a path node.
fn path_node(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == '.' || c.is_whitespace() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_encode_sorted_tags_and_prefix() {
        let encoder = GraphiteEncoder::new(Some("stats".into()));
        let point = DataPoint::new("cpu")
            .tag("region", "eu")
            .tag("host", "web.1")
            .field("idle", 97.5)
            .field("up", true)
            .field("note", "skipped");
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            encoder.encode(&point, now).unwrap(),
            vec![
                "stats.cpu.web_1.eu.idle 97.5 1704067200".to_string(),
                "stats.cpu.web_1.eu.up 1 1704067200".to_string(),
            ]
        );
    }

    #[test]
    fn test_batch_payload() {
        let encoder = GraphiteEncoder::default();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let points = vec![DataPoint::new("mem").field("value", 1)];
        assert_eq!(
            encoder.encode_batch(&points, now).unwrap(),
            "mem.value 1 1704067200\n"
        );
    }
}

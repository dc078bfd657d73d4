//! InfluxDB line protocol.
//!
//! `measurement,tag=value field=1.5,count=3i,ok=true,msg="hi" 1704067200000000000`

use crate::error::{Result, TsdbError};
use crate::model::{DataPoint, FieldValue};

/// Encodes points as line protocol with nanosecond timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProtocolEncoder;

impl LineProtocolEncoder {
    /// One line for `point`, without a trailing newline.
    ///
    /// Points without a timestamp are stamped by the server.
    pub fn encode(&self, point: &DataPoint) -> Result<String> {
        point.validate()?;

        let mut line = escape(point.measurement(), &[',', ' ']);
        for (key, value) in point.tags() {
            line.push(',');
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(value, &[',', '=', ' ']));
        }

        let fields: Vec<String> = point
            .fields()
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), field(value)))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));

        if let Some(time) = point.time() {
            let nanos = time.timestamp_nanos_opt().ok_or_else(|| {
                TsdbError::configuration(format!(
                    "timestamp {time} cannot be represented in nanoseconds"
                ))
            })?;
            line.push(' ');
            line.push_str(&nanos.to_string());
        }
        Ok(line)
    }

    /// Newline-separated lines for a batch.
    pub fn encode_batch(&self, points: &[DataPoint]) -> Result<String> {
        let lines = points
            .iter()
            .map(|p| self.encode(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(lines.join("\n"))
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn field(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(v) => v.to_string(),
        FieldValue::Integer(v) => format!("{v}i"),
        FieldValue::Boolean(b) => b.to_string(),
        FieldValue::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_encode_full_point() {
        let point = DataPoint::new("cpu load")
            .tag("host", "web 1")
            .tag("dc", "eu,west")
            .field("value", 0.5)
            .field("count", 3)
            .field("ok", true)
            .field("msg", "say \"hi\"")
            .timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(
            LineProtocolEncoder.encode(&point).unwrap(),
            "cpu\\ load,dc=eu\\,west,host=web\\ 1 count=3i,msg=\"say \\\"hi\\\"\",ok=true,value=0.5 1704067200000000000"
        );
    }

    #[test]
    fn test_point_without_fields_rejected() {
        assert!(LineProtocolEncoder.encode(&DataPoint::new("cpu")).is_err());
    }

    #[test]
    fn test_batch() {
        let points = vec![
            DataPoint::new("a").field("v", 1),
            DataPoint::new("b").field("v", 2),
        ];
        assert_eq!(
            LineProtocolEncoder.encode_batch(&points).unwrap(),
            "a v=1i\nb v=2i"
        );
    }
}

//! Tag sets encoded into RRD file names.
//!
//! A file name is the sanitized measurement followed by one `_key-value`
//! segment per tag, sorted by key, and the `.rrd` extension:
//! `cpu_usage_env-prod_host-server1.rrd`. Inside keys `\`, `.`, `_` and `-`
//! are backslash-escaped; inside values `\`, `.` and `_` are. A value may
//! therefore contain a bare `-`, since only the first unescaped `-` of a
//! segment separates key from value.

use std::collections::BTreeMap;

use crate::error::{Result, TsdbError};
use crate::model::Value;
use crate::security::PathSecurity;

pub const RRD_EXTENSION: &str = "rrd";

const ESCAPE: char = '\\';
const SEGMENT_SEPARATOR: char = '_';
const KEY_VALUE_SEPARATOR: char = '-';

/// Decoded tag map, values already coerced to strings.
pub type TagMap = BTreeMap<String, String>;

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ESCAPE || special.contains(&c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

pub fn escape_key(key: &str) -> String {
    escape(key, &['.', SEGMENT_SEPARATOR, KEY_VALUE_SEPARATOR])
}

pub fn escape_value(value: &str) -> String {
    escape(value, &['.', SEGMENT_SEPARATOR])
}

pub fn unescape(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Byte offset of the first `needle` not preceded by an escape.
fn find_unescaped(encoded: &str, needle: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in encoded.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == needle {
            return Some(i);
        }
    }
    None
}

/// Splits on every unescaped `separator`, keeping escapes in the parts.
fn split_unescaped(encoded: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in encoded.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == separator {
            parts.push(&encoded[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&encoded[start..]);
    parts
}

/// Sanitized measurement usable as the start of a file name.
pub fn measurement_stem(measurement: &str) -> Result<String> {
    let stem = PathSecurity::sanitize_file_stem(measurement);
    if stem.is_empty() {
        return Err(TsdbError::tag_resolution(format!(
            "measurement '{measurement}' has no characters usable in a file name"
        )));
    }
    Ok(stem)
}

/// `_key-value` segments for every tag, sorted by key.
///
/// # Errors
///
/// Fails for list values, which have no single string form.
pub fn encode_tags(tags: &BTreeMap<String, Value>) -> Result<String> {
    let mut encoded = String::new();
    for (key, value) in tags {
        encoded.push(SEGMENT_SEPARATOR);
        encoded.push_str(&escape_key(key));
        encoded.push(KEY_VALUE_SEPARATOR);
        encoded.push_str(&escape_value(&value.to_tag_string()?));
    }
    Ok(encoded)
}

/// `<measurement>_k-v....rrd`, checked to be a single safe path segment.
pub fn encode_file_name(measurement: &str, tags: &BTreeMap<String, Value>) -> Result<String> {
    let name = format!(
        "{}{}.{RRD_EXTENSION}",
        measurement_stem(measurement)?,
        encode_tags(tags)?
    );
    PathSecurity::validate_file_name(&name)?;
    Ok(name)
}

fn decode_segment(segment: &str) -> Option<(String, String)> {
    let split = find_unescaped(segment, KEY_VALUE_SEPARATOR)?;
    let key = unescape(&segment[..split]);
    let value = unescape(&segment[split + KEY_VALUE_SEPARATOR.len_utf8()..]);
    Some((key, value))
}

/// Decodes the tags of a file stem known to belong to `measurement`.
///
/// Returns `None` when the stem belongs to another measurement sharing the
/// prefix (`cpu` vs `cpu_usage`) or is not tag-encoded.
pub fn decode_for_measurement(stem: &str, measurement: &str) -> Option<TagMap> {
    let rest = stem.strip_prefix(measurement)?;
    if rest.is_empty() {
        return Some(TagMap::new());
    }
    let rest = rest.strip_prefix(SEGMENT_SEPARATOR)?;
    split_unescaped(rest, SEGMENT_SEPARATOR)
        .into_iter()
        .map(decode_segment)
        .collect()
}

/// Splits a file stem into measurement and tags without knowing the
/// measurement.
///
/// The measurement is the shortest leading run of segments after which every
/// segment is a `key-value` pair, so a measurement whose later `_`-separated
/// parts contain `-` is misread as tags.
pub fn decode_stem(stem: &str) -> Option<(String, TagMap)> {
    let segments = split_unescaped(stem, SEGMENT_SEPARATOR);
    let split = (1..=segments.len()).find(|&i| {
        segments[i..]
            .iter()
            .all(|s| find_unescaped(s, KEY_VALUE_SEPARATOR).is_some())
    })?;
    let measurement = segments[..split].join("_");
    if measurement.is_empty() {
        return None;
    }
    let tags = segments[split..]
        .iter()
        .map(|s| decode_segment(s))
        .collect::<Option<TagMap>>()?;
    Some((measurement, tags))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn test_encode_sorted_and_escaped() {
        let name = encode_file_name(
            "cpu_usage",
            &tags(&[("host", "web.1"), ("env", "prod_eu"), ("dc-id", "a-b")]),
        )
        .unwrap();
        assert_eq!(
            name,
            "cpu_usage_dc\\-id-a-b_env-prod\\_eu_host-web\\.1.rrd"
        );
    }

    #[test]
    fn test_decode_for_measurement() {
        let decoded =
            decode_for_measurement("cpu_usage_dc\\-id-a-b_env-prod\\_eu", "cpu_usage").unwrap();
        assert_eq!(decoded.get("dc-id").unwrap(), "a-b");
        assert_eq!(decoded.get("env").unwrap(), "prod_eu");

        assert_eq!(decoded.len(), 2);
        assert!(decode_for_measurement("cpu_usage", "cpu_usage").unwrap().is_empty());
        // Shares the prefix but is another measurement
        assert!(decode_for_measurement("cpu_usage_host-a", "cpu").is_none());
    }

    #[test]
    fn test_decode_stem_without_measurement() {
        let (measurement, decoded) = decode_stem("disk-io_host-a").unwrap();
        assert_eq!(measurement, "disk-io");
        assert_eq!(decoded.get("host").unwrap(), "a");

        let (measurement, decoded) = decode_stem("cpu_usage").unwrap();
        assert_eq!(measurement, "cpu_usage");
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_booleans_and_lists() {
        let mut map = BTreeMap::new();
        map.insert("up".to_string(), Value::Bool(true));
        map.insert("down".to_string(), Value::Bool(false));
        assert_eq!(encode_tags(&map).unwrap(), "_down-_up-1");

        map.insert("many".to_string(), Value::from(vec!["a", "b"]));
        assert!(matches!(encode_tags(&map), Err(TsdbError::TagResolution(_))));
    }

    #[test]
    fn test_path_separator_in_value_rejected() {
        assert!(encode_file_name("cpu", &tags(&[("host", "../etc")])).is_err());
    }

    #[test]
    fn test_unusable_measurement() {
        assert!(measurement_stem("***").is_err());
    }
}

//! Arguments for `rrdtool create` and `rrdtool update`.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::error::{Result, TsdbError};
use crate::model::DataPoint;

/// Longest data source name rrdtool accepts.
pub const MAX_DS_NAME: usize = 19;

/// Data source name for a field: `[a-zA-Z0-9_]`, at most 19 characters.
pub fn ds_name(field: &str) -> String {
    field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(MAX_DS_NAME)
        .collect()
}

/// Builds create/update argument lists for one file per tag set.
#[derive(Debug, Clone)]
pub struct RrdEncoder {
    step_secs: u64,
    heartbeat_secs: u64,
    rras: Vec<String>,
}

impl RrdEncoder {
    pub fn new(step_secs: u64, heartbeat_secs: u64, rras: Vec<String>) -> Self {
        Self {
            step_secs,
            heartbeat_secs,
            rras,
        }
    }

    /// `<path> --start <ts-1> --step <s> DS:<f>:GAUGE:<hb>:U:U ... RRA:...`
    ///
    /// One GAUGE data source per numeric field of `point`.
    pub fn create_args(
        &self,
        path: &Path,
        point: &DataPoint,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let fields = numeric_fields(point)?;
        let start = point.time().unwrap_or(now).timestamp() - 1;

        let mut args = vec![
            path.to_string_lossy().into_owned(),
            "--start".to_string(),
            start.to_string(),
            "--step".to_string(),
            self.step_secs.to_string(),
        ];
        args.extend(
            fields
                .iter()
                .map(|(name, _)| format!("DS:{name}:GAUGE:{}:U:U", self.heartbeat_secs)),
        );
        args.extend(self.rras.iter().cloned());
        Ok(args)
    }

    /// `<path> --template f1:f2 <ts>:<v1>:<v2>`
    pub fn update_args(
        &self,
        path: &Path,
        point: &DataPoint,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let fields = numeric_fields(point)?;
        let timestamp = point.time().unwrap_or(now).timestamp();

        let template: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
        let values: Vec<String> = fields.iter().map(|(_, v)| v.to_string()).collect();
        Ok(vec![
            path.to_string_lossy().into_owned(),
            "--template".to_string(),
            template.join(":"),
            format!("{timestamp}:{}", values.join(":")),
        ])
    }
}

fn numeric_fields(point: &DataPoint) -> Result<Vec<(String, f64)>> {
    point.validate()?;
    let mut fields = Vec::new();
    for (field, value) in point.fields() {
        match value.as_f64() {
            Some(v) => fields.push((ds_name(field), v)),
            None => trace!(field = %field, "rrdtool stores numbers only, skipping field"),
        }
    }
    if fields.is_empty() {
        return Err(TsdbError::configuration(format!(
            "data point for '{}' has no numeric fields",
            point.measurement()
        )));
    }
    Ok(fields)
}

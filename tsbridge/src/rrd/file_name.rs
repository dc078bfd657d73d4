use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::{debug, instrument};

use super::codec::{decode_for_measurement, decode_stem, encode_file_name, measurement_stem};
use super::{glob_files, rrd_stem, TagSearch, TagStrategy};
use crate::error::Result;
use crate::model::{QueryCondition, Value};

/// Every tag is encoded into the file name:
/// `<base>/cpu_usage_env-prod_host-server1.rrd`.
#[derive(Debug, Clone)]
pub struct FileNameStrategy {
    base_dir: PathBuf,
}

impl FileNameStrategy {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl TagStrategy for FileNameStrategy {
    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn file_path(&self, measurement: &str, tags: &BTreeMap<String, Value>) -> Result<PathBuf> {
        Ok(self.base_dir.join(encode_file_name(measurement, tags)?))
    }

    #[instrument(skip(self, conditions), fields(base_dir = %self.base_dir.display()))]
    fn resolve_file_paths(
        &self,
        measurement: &str,
        conditions: &[QueryCondition],
    ) -> Result<Vec<PathBuf>> {
        let stem = measurement_stem(measurement)?;
        let pattern = format!("{}*.rrd", Pattern::escape(&stem));

        let mut matched = Vec::new();
        for path in glob_files(&self.base_dir, &pattern)? {
            let Some(tags) = rrd_stem(&path).and_then(|s| decode_for_measurement(s, &stem)) else {
                continue;
            };
            if TagSearch::matches(&tags, conditions)? {
                matched.push(path);
            }
        }
        debug!(count = matched.len(), "resolved RRD files");
        Ok(matched)
    }

    fn find_measurements_by_tags(&self, conditions: &[QueryCondition]) -> Result<Vec<String>> {
        let mut measurements = BTreeSet::new();
        for path in glob_files(&self.base_dir, "*.rrd")? {
            let Some((measurement, tags)) = rrd_stem(&path).and_then(decode_stem) else {
                continue;
            };
            if TagSearch::matches(&tags, conditions)? {
                measurements.insert(measurement);
            }
        }
        Ok(measurements.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use std::fs;
    use tempfile::TempDir;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    fn touch(strategy: &FileNameStrategy, measurement: &str, pairs: &[(&str, &str)]) -> PathBuf {
        let path = strategy.file_path(measurement, &tags(pairs)).unwrap();
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_file_path_is_order_independent() {
        let strategy = FileNameStrategy::new("/data");
        let a = strategy
            .file_path("cpu", &tags(&[("host", "a"), ("env", "prod")]))
            .unwrap();
        let b = strategy
            .file_path("cpu", &tags(&[("env", "prod"), ("host", "a")]))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/data/cpu_env-prod_host-a.rrd"));
    }

    #[test]
    fn test_resolve_filters_by_conditions() {
        let dir = TempDir::new().unwrap();
        let strategy = FileNameStrategy::new(dir.path());
        let web = touch(&strategy, "cpu", &[("host", "web.1"), ("env", "prod")]);
        let db = touch(&strategy, "cpu", &[("host", "db1"), ("env", "prod")]);
        touch(&strategy, "cpu_usage", &[("host", "web.1")]);

        let all = strategy.resolve_file_paths("cpu", &[]).unwrap();
        assert_eq!(all, {
            let mut v = vec![web.clone(), db.clone()];
            v.sort();
            v
        });

        let found = strategy
            .resolve_file_paths(
                "cpu",
                &[QueryCondition::new("host", Operator::Eq, "web.1")],
            )
            .unwrap();
        assert_eq!(found, vec![web]);
    }

    #[test]
    fn test_find_measurements() {
        let dir = TempDir::new().unwrap();
        let strategy = FileNameStrategy::new(dir.path());
        touch(&strategy, "cpu", &[("host", "a")]);
        touch(&strategy, "mem", &[("host", "a")]);
        touch(&strategy, "disk", &[("host", "b")]);

        let found = strategy
            .find_measurements_by_tags(&[QueryCondition::new("host", Operator::Eq, "a")])
            .unwrap();
        assert_eq!(found, vec!["cpu".to_string(), "mem".to_string()]);
    }
}

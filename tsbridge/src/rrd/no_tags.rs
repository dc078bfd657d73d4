use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::codec::{measurement_stem, RRD_EXTENSION};
use super::{glob_files, rrd_stem, TagStrategy};
use crate::error::Result;
use crate::model::{QueryCondition, Value};

/// One file per measurement; tags are ignored, so every tag set of a
/// measurement shares `<base>/<measurement>.rrd`.
#[derive(Debug, Clone)]
pub struct NoTagsStrategy {
    base_dir: PathBuf,
}

impl NoTagsStrategy {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl TagStrategy for NoTagsStrategy {
    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn file_path(&self, measurement: &str, tags: &BTreeMap<String, Value>) -> Result<PathBuf> {
        if !tags.is_empty() {
            trace!(count = tags.len(), "tags are not stored by this strategy");
        }
        Ok(self
            .base_dir
            .join(format!("{}.{RRD_EXTENSION}", measurement_stem(measurement)?)))
    }

    /// Conditions are accepted vacuously.
    fn resolve_file_paths(
        &self,
        measurement: &str,
        _conditions: &[QueryCondition],
    ) -> Result<Vec<PathBuf>> {
        let path = self.file_path(measurement, &BTreeMap::new())?;
        Ok(if path.is_file() { vec![path] } else { Vec::new() })
    }

    fn find_measurements_by_tags(&self, _conditions: &[QueryCondition]) -> Result<Vec<String>> {
        Ok(glob_files(&self.base_dir, "*.rrd")?
            .iter()
            .filter_map(|p| rrd_stem(p).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_tags_are_ignored() {
        let strategy = NoTagsStrategy::new("/data");
        let mut tags = BTreeMap::new();
        tags.insert("host".to_string(), Value::from("a"));
        assert_eq!(
            strategy.file_path("disk io/sda", &tags).unwrap(),
            PathBuf::from("/data/diskiosda.rrd")
        );
    }

    #[test]
    fn test_conditions_pass_vacuously() {
        let dir = TempDir::new().unwrap();
        let strategy = NoTagsStrategy::new(dir.path());
        assert!(strategy.resolve_file_paths("cpu", &[]).unwrap().is_empty());

        fs::write(dir.path().join("cpu.rrd"), b"").unwrap();
        fs::write(dir.path().join("mem.rrd"), b"").unwrap();
        let found = strategy
            .resolve_file_paths("cpu", &[QueryCondition::new("host", Operator::Eq, "zzz")])
            .unwrap();
        assert_eq!(found, vec![dir.path().join("cpu.rrd")]);

        assert_eq!(
            strategy.find_measurements_by_tags(&[]).unwrap(),
            vec!["cpu".to_string(), "mem".to_string()]
        );
    }
}

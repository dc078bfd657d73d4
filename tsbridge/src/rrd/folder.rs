use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use glob::Pattern;
use tracing::{debug, instrument};

use super::codec::{decode_for_measurement, decode_stem, encode_file_name, measurement_stem, TagMap};
use super::{glob_files, rrd_stem, TagSearch, TagStrategy};
use crate::error::{Result, TsdbError};
use crate::model::{is_conjunctive, Operator, QueryCondition, Value};
use crate::security::PathSecurity;

/// Directory segment used when a folder tag is absent.
pub const UNSET_SEGMENT: &str = "_unset";

/// Selected tags become nested directories, the rest are encoded into the
/// file name: folder tags `[region, host]` put
/// `cpu{region=us-east,host=server1,env=prod}` at
/// `<base>/us-east/server1/cpu_env-prod.rrd`.
#[derive(Debug, Clone)]
pub struct FolderStrategy {
    base_dir: PathBuf,
    folder_tags: Vec<String>,
}

impl FolderStrategy {
    pub fn new<I, S>(base_dir: impl Into<PathBuf>, folder_tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_dir: base_dir.into(),
            folder_tags: folder_tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn folder_tags(&self) -> &[String] {
        &self.folder_tags
    }

    fn folder_segment(value: Option<&Value>) -> Result<String> {
        let segment = match value {
            Some(value) => value.to_tag_string()?,
            None => String::new(),
        };
        if segment.is_empty() {
            return Ok(UNSET_SEGMENT.to_string());
        }
        PathSecurity::validate_segment(&segment)
            .map_err(|e| TsdbError::tag_resolution(format!("folder tag value rejected: {e}")))?;
        Ok(segment)
    }

    /// Glob segments for the folder levels; pinned by equality conditions
    /// when the chain is purely conjunctive.
    fn folder_pattern(&self, conditions: &[QueryCondition]) -> Result<Vec<String>> {
        let prune = is_conjunctive(conditions);
        let mut segments = Vec::with_capacity(self.folder_tags.len());
        for tag in &self.folder_tags {
            let pinned = conditions
                .iter()
                .find(|c| prune && c.operator == Operator::Eq && &c.field == tag);
            let segment = match pinned {
                Some(condition) => {
                    Pattern::escape(&Self::folder_segment(Some(&condition.value))?)
                }
                None => "*".to_string(),
            };
            segments.push(segment);
        }
        Ok(segments)
    }

    /// Tags recovered from the directory part of `path`.
    fn folder_values(&self, path: &Path) -> Option<TagMap> {
        let relative = path.strip_prefix(&self.base_dir).ok()?;
        let dirs: Vec<&str> = relative
            .parent()?
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();
        if dirs.len() != self.folder_tags.len() {
            return None;
        }
        Some(
            self.folder_tags
                .iter()
                .zip(dirs)
                .filter(|(_, dir)| *dir != UNSET_SEGMENT)
                .map(|(tag, dir)| (tag.clone(), dir.to_string()))
                .collect(),
        )
    }

    fn all_levels(&self) -> String {
        let mut pattern = vec!["*"; self.folder_tags.len()];
        pattern.push("*.rrd");
        pattern.join("/")
    }
}

impl TagStrategy for FolderStrategy {
    fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Creates the folder hierarchy as a side effect.
    fn file_path(&self, measurement: &str, tags: &BTreeMap<String, Value>) -> Result<PathBuf> {
        let mut dir = self.base_dir.clone();
        for tag in &self.folder_tags {
            dir.push(Self::folder_segment(tags.get(tag))?);
        }

        let remaining: BTreeMap<String, Value> = tags
            .iter()
            .filter(|(k, _)| !self.folder_tags.contains(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let file_name = encode_file_name(measurement, &remaining)?;

        fs::create_dir_all(&dir)?;
        Ok(dir.join(file_name))
    }

    #[instrument(skip(self, conditions), fields(base_dir = %self.base_dir.display()))]
    fn resolve_file_paths(
        &self,
        measurement: &str,
        conditions: &[QueryCondition],
    ) -> Result<Vec<PathBuf>> {
        let stem = measurement_stem(measurement)?;
        let mut pattern = self.folder_pattern(conditions)?;
        pattern.push(format!("{}*.rrd", Pattern::escape(&stem)));

        let mut matched = Vec::new();
        for path in glob_files(&self.base_dir, &pattern.join("/"))? {
            let Some(mut tags) = self.folder_values(&path) else {
                continue;
            };
            let Some(file_tags) = rrd_stem(&path).and_then(|s| decode_for_measurement(s, &stem))
            else {
                continue;
            };
            tags.extend(file_tags);
            if TagSearch::matches(&tags, conditions)? {
                matched.push(path);
            }
        }
        debug!(count = matched.len(), "resolved RRD files");
        Ok(matched)
    }

    fn find_measurements_by_tags(&self, conditions: &[QueryCondition]) -> Result<Vec<String>> {
        let mut measurements = BTreeSet::new();
        for path in glob_files(&self.base_dir, &self.all_levels())? {
            let Some(mut tags) = self.folder_values(&path) else {
                continue;
            };
            let Some((measurement, file_tags)) = rrd_stem(&path).and_then(decode_stem) else {
                continue;
            };
            tags.extend(file_tags);
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
    use tempfile::TempDir;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn test_file_path_creates_folders() {
        let dir = TempDir::new().unwrap();
        let strategy = FolderStrategy::new(dir.path(), ["region", "host"]);
        let path = strategy
            .file_path(
                "cpu_usage",
                &tags(&[("region", "us-east"), ("host", "server1"), ("env", "prod")]),
            )
            .unwrap();
        assert_eq!(
            path,
            dir.path().join("us-east/server1/cpu_usage_env-prod.rrd")
        );
        assert!(dir.path().join("us-east/server1").is_dir());
    }

    #[test]
    fn test_missing_folder_tag_is_unset() {
        let dir = TempDir::new().unwrap();
        let strategy = FolderStrategy::new(dir.path(), ["region", "host"]);
        let path = strategy
            .file_path("cpu", &tags(&[("host", "server1")]))
            .unwrap();
        assert_eq!(path, dir.path().join("_unset/server1/cpu.rrd"));
    }

    #[test]
    fn test_unsafe_folder_value_rejected() {
        let dir = TempDir::new().unwrap();
        let strategy = FolderStrategy::new(dir.path(), ["region"]);
        let err = strategy
            .file_path("cpu", &tags(&[("region", "..")]))
            .unwrap_err();
        assert!(matches!(err, TsdbError::TagResolution(_)));
    }

    #[test]
    fn test_resolve_prunes_and_filters() {
        let dir = TempDir::new().unwrap();
        let strategy = FolderStrategy::new(dir.path(), ["region"]);
        for (region, env) in [("eu", "prod"), ("eu", "dev"), ("us", "prod")] {
            let path = strategy
                .file_path("cpu", &tags(&[("region", region), ("env", env)]))
                .unwrap();
            fs::write(path, b"").unwrap();
        }

        let found = strategy
            .resolve_file_paths(
                "cpu",
                &[
                    QueryCondition::new("region", Operator::Eq, "eu"),
                    QueryCondition::new("env", Operator::Eq, "prod"),
                ],
            )
            .unwrap();
        assert_eq!(found, vec![dir.path().join("eu/cpu_env-prod.rrd")]);

        // OR chains scan every folder
        let found = strategy
            .resolve_file_paths(
                "cpu",
                &[
                    QueryCondition::new("region", Operator::Eq, "us"),
                    QueryCondition::or("env", Operator::Eq, "dev"),
                ],
            )
            .unwrap();
        assert_eq!(found.len(), 2);

        let measurements = strategy
            .find_measurements_by_tags(&[QueryCondition::new("region", Operator::Eq, "us")])
            .unwrap();
        assert_eq!(measurements, vec!["cpu".to_string()]);
    }
}

//! RRDtool driver over local files.
//!
//! Each distinct tag set is one RRD file placed by the configured
//! [`TagStrategy`]. Writes create the file on first use and then update it;
//! reads run `rrdtool xport` on the first matching file. The "database" is
//! the base directory.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::config::{RrdConfig, RrdStrategyConfig};
use super::{run_query, Driver};
use crate::builder::{QueryBuilder, RrdQueryBuilder};
use crate::error::{ErrorContext, Result};
use crate::format::RrdEncoder;
use crate::logging::{truncate_field, LogConfig};
use crate::perf_debug;
use crate::model::{DataPoint, QueryCondition, QueryResult, Value};
use crate::parse::ResponseFormat;
use crate::query::{Query, RawQuery};
use crate::rrd::{FileNameStrategy, FolderStrategy, NoTagsStrategy, TagStrategy};
use crate::transport::{Command, Transport};

pub struct RrdDriver {
    config: RrdConfig,
    strategy: Arc<dyn TagStrategy>,
    builder: RrdQueryBuilder,
    encoder: RrdEncoder,
    transport: Arc<dyn Transport>,
    log_config: LogConfig,
}

impl RrdDriver {
    pub fn new(config: RrdConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let base = config.base_dir().to_path_buf();
        let strategy: Arc<dyn TagStrategy> = match config.strategy() {
            RrdStrategyConfig::FileName => Arc::new(FileNameStrategy::new(base)),
            RrdStrategyConfig::Folder { folder_tags } => {
                Arc::new(FolderStrategy::new(base, folder_tags.iter().cloned()))
            }
            RrdStrategyConfig::NoTags => Arc::new(NoTagsStrategy::new(base)),
        };
        let encoder = RrdEncoder::new(
            config.step_secs(),
            config.heartbeat_secs(),
            config.rras().to_vec(),
        );
        Ok(Self {
            builder: RrdQueryBuilder::new(strategy.clone()),
            strategy,
            encoder,
            config,
            transport,
            log_config: LogConfig::default(),
        })
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &RrdConfig {
        &self.config
    }

    pub fn strategy(&self) -> &Arc<dyn TagStrategy> {
        &self.strategy
    }

    /// Measurements with at least one file matching `conditions`.
    pub fn measurements_by_tags(&self, conditions: &[QueryCondition]) -> Result<Vec<String>> {
        self.strategy.find_measurements_by_tags(conditions)
    }

    async fn rrdtool(&self, command: &str, args: Vec<String>) -> Result<()> {
        if self.log_config.log_writes {
            debug!(
                "rrdtool {command} {}",
                truncate_field(&args.join(" "), self.log_config.max_field_length)
            );
        }
        self.transport
            .send(&Command::Rrd {
                command: command.to_string(),
                args,
            })
            .await
    }

    async fn write_point(&self, point: &DataPoint) -> Result<()> {
        let tags: BTreeMap<String, Value> = point
            .tags()
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v)))
            .collect();
        let path = self.strategy.file_path(point.measurement(), &tags)?;
        let now = Utc::now();

        let exists = tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?;
        if !exists {
            perf_debug!(self.log_config, path = %path.display(), "Creating RRD file");
            self.rrdtool("create", self.encoder.create_args(&path, point, now)?)
                .await?;
        }

        let mut args = self.encoder.update_args(&path, point, now)?;
        if let Some(address) = self.config.rrdcached_address() {
            args.insert(1, address.to_string());
            args.insert(1, "--daemon".to_string());
        }
        self.rrdtool("update", args).await
    }
}

#[async_trait]
impl Driver for RrdDriver {
    fn name(&self) -> &str {
        "rrdtool"
    }

    async fn connect(&self) -> Result<bool> {
        self.config.validate()?;
        info!(
            base_dir = %self.config.base_dir().display(),
            strategy = ?self.config.strategy(),
            "RRDtool driver ready"
        );
        Ok(true)
    }

    #[instrument(skip(self, points), fields(points = points.len()))]
    async fn write_batch(&self, points: &[DataPoint]) -> Result<bool> {
        for point in points {
            self.write_point(point).await?;
        }
        Ok(true)
    }

    #[instrument(skip(self, query), fields(measurement = %query.measurement()))]
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        let raw = RawQuery::from(self.builder.build(query)?);
        run_query(
            self.transport.as_ref(),
            &raw,
            ResponseFormat::RrdXportJson,
            &self.log_config,
        )
        .await
    }

    /// Creates the base directory.
    async fn create_database(&self, _name: &str) -> Result<bool> {
        let base = self.config.base_dir();
        tokio::fs::create_dir_all(base)
            .await
            .with_context(|| format!("creating {}", base.display()))?;
        Ok(true)
    }

    /// Removes the base directory and every file below it.
    ///
    /// Returns `false` when there was nothing to remove.
    async fn delete_database(&self, _name: &str) -> Result<bool> {
        let base = self.config.base_dir();
        if !tokio::fs::try_exists(base).await? {
            return Ok(false);
        }
        warn!(base_dir = %base.display(), "Deleting all RRD files");
        tokio::fs::remove_dir_all(base)
            .await
            .with_context(|| format!("removing {}", base.display()))?;
        Ok(true)
    }

    /// Removes every file of `measurement`, whatever its tags.
    async fn delete_measurement(&self, measurement: &str) -> Result<bool> {
        let files = self.strategy.resolve_file_paths(measurement, &[])?;
        for file in &files {
            if self.config.rrdcached_address().is_some() {
                self.rrdtool("forget", vec![path_arg(file)]).await?;
            }
            tokio::fs::remove_file(file)
                .await
                .with_context(|| format!("removing {}", file.display()))?;
        }
        perf_debug!(
            self.log_config,
            measurement,
            files = files.len(),
            "Deleted measurement"
        );
        Ok(!files.is_empty())
    }

    async fn close(&self) -> Result<()> {
        debug!("RRDtool driver closed");
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

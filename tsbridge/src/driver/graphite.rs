//! Graphite driver: render API reads, carbon plaintext writes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument};

use super::config::GraphiteConfig;
use super::{run_query, send_write, Driver};
use crate::builder::{GraphiteQueryBuilder, QueryBuilder};
use crate::error::{Result, TsdbError};
use crate::format::GraphiteEncoder;
use crate::logging::LogConfig;
use crate::model::{DataPoint, QueryResult};
use crate::parse::ResponseFormat;
use crate::query::{Query, RawQuery};
use crate::transport::{Command, Transport};

pub struct GraphiteDriver {
    config: GraphiteConfig,
    builder: GraphiteQueryBuilder,
    encoder: GraphiteEncoder,
    transport: Arc<dyn Transport>,
    log_config: LogConfig,
}

impl GraphiteDriver {
    pub fn new(config: GraphiteConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let mut builder = GraphiteQueryBuilder::new();
        if let Some(prefix) = config.prefix() {
            builder = builder.with_prefix(prefix);
        }
        let encoder = GraphiteEncoder::new(config.prefix().map(str::to_string));
        Ok(Self {
            config,
            builder,
            encoder,
            transport,
            log_config: LogConfig::default(),
        })
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &GraphiteConfig {
        &self.config
    }

    fn metric_path(&self, measurement: &str) -> String {
        match self.config.prefix() {
            Some(prefix) => format!("{prefix}.{measurement}"),
            None => measurement.to_string(),
        }
    }
}

#[async_trait]
impl Driver for GraphiteDriver {
    fn name(&self) -> &str {
        "graphite"
    }

    async fn connect(&self) -> Result<bool> {
        self.config.validate()?;
        info!(
            carbon = %format!("{}:{}", self.config.host(), self.config.port()),
            render_url = %self.config.render_url(),
            "Graphite driver ready"
        );
        Ok(true)
    }

    #[instrument(skip(self, points), fields(points = points.len()))]
    async fn write_batch(&self, points: &[DataPoint]) -> Result<bool> {
        let payload = self.encoder.encode_batch(points, Utc::now())?;
        send_write(self.transport.as_ref(), self.name(), payload, &self.log_config).await
    }

    #[instrument(skip(self, query), fields(measurement = %query.measurement()))]
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        let raw = RawQuery::from(self.builder.build(query)?);
        run_query(
            self.transport.as_ref(),
            &raw,
            ResponseFormat::GraphiteJson,
            &self.log_config,
        )
        .await
    }

    /// Carbon creates storage on first write.
    async fn create_database(&self, name: &str) -> Result<bool> {
        debug!(database = %name, "Graphite creates storage on first write");
        Ok(true)
    }

    async fn delete_database(&self, name: &str) -> Result<bool> {
        Err(TsdbError::NotSupported(format!(
            "Graphite cannot delete database '{name}'"
        )))
    }

    async fn delete_measurement(&self, measurement: &str) -> Result<bool> {
        self.transport
            .send(&Command::DeleteMeasurement(self.metric_path(measurement)))
            .await?;
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        debug!("Graphite driver closed");
        Ok(())
    }
}

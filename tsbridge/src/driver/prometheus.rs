//! Prometheus driver: PromQL reads, Pushgateway writes.
//!
//! Prometheus has no databases. `create_database` is accepted as a no-op and
//! `delete_database` is not supported.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::config::PrometheusConfig;
use super::{run_query, send_write, Driver};
use crate::builder::{PrometheusQueryBuilder, QueryBuilder};
use crate::error::{Result, TsdbError};
use crate::format::ExpositionEncoder;
use crate::logging::LogConfig;
use crate::model::{DataPoint, QueryResult};
use crate::parse::ResponseFormat;
use crate::query::{Query, RawQuery};
use crate::transport::{Command, Transport};

pub struct PrometheusDriver {
    config: PrometheusConfig,
    builder: PrometheusQueryBuilder,
    transport: Arc<dyn Transport>,
    log_config: LogConfig,
}

impl PrometheusDriver {
    pub fn new(config: PrometheusConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            builder: PrometheusQueryBuilder::new(),
            transport,
            log_config: LogConfig::default(),
        })
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &PrometheusConfig {
        &self.config
    }
}

#[async_trait]
impl Driver for PrometheusDriver {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn connect(&self) -> Result<bool> {
        self.config.validate()?;
        info!(
            url = %self.config.url(),
            pushgateway = ?self.config.pushgateway_url(),
            "Prometheus driver ready"
        );
        Ok(true)
    }

    #[instrument(skip(self, points), fields(points = points.len(), job = %self.config.job()))]
    async fn write_batch(&self, points: &[DataPoint]) -> Result<bool> {
        if self.config.pushgateway_url().is_none() {
            return Err(TsdbError::NotSupported(
                "writing to Prometheus requires a pushgateway_url".to_string(),
            ));
        }
        let payload = ExpositionEncoder.encode_batch(points)?;
        send_write(self.transport.as_ref(), self.name(), payload, &self.log_config).await
    }

    #[instrument(skip(self, query), fields(measurement = %query.measurement()))]
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        let raw = RawQuery::from(self.builder.build(query)?);
        run_query(
            self.transport.as_ref(),
            &raw,
            ResponseFormat::PrometheusJson,
            &self.log_config,
        )
        .await
    }

    async fn create_database(&self, name: &str) -> Result<bool> {
        debug!(database = %name, "Prometheus has no databases, nothing to create");
        Ok(true)
    }

    async fn delete_database(&self, name: &str) -> Result<bool> {
        Err(TsdbError::NotSupported(format!(
            "Prometheus cannot delete database '{name}'"
        )))
    }

    /// Deletes every series of the metric through the admin API.
    async fn delete_measurement(&self, measurement: &str) -> Result<bool> {
        self.transport
            .send(&Command::DeleteMeasurement(measurement.to_string()))
            .await?;
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        debug!("Prometheus driver closed");
        Ok(())
    }
}

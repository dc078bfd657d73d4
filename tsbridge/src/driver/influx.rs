//! InfluxDB 2.x driver: Flux or InfluxQL reads, line protocol writes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::config::{InfluxConfig, InfluxLanguage};
use super::{run_query, send_write, Driver};
use crate::builder::{AnyQueryBuilder, InfluxQlQueryBuilder, InfluxQueryBuilder};
use crate::error::Result;
use crate::format::LineProtocolEncoder;
use crate::logging::LogConfig;
use crate::model::{DataPoint, QueryResult};
use crate::parse::ResponseFormat;
use crate::query::Query;
use crate::transport::{Command, Transport};

pub struct InfluxDbDriver {
    config: InfluxConfig,
    builder: AnyQueryBuilder,
    transport: Arc<dyn Transport>,
    log_config: LogConfig,
}

impl InfluxDbDriver {
    pub fn new(config: InfluxConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let builder = match config.language() {
            InfluxLanguage::Flux => InfluxQueryBuilder::new(config.bucket()).into(),
            InfluxLanguage::InfluxQl => InfluxQlQueryBuilder::new().into(),
        };
        Ok(Self {
            config,
            builder,
            transport,
            log_config: LogConfig::default(),
        })
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    fn response_format(&self) -> ResponseFormat {
        match self.config.language() {
            InfluxLanguage::Flux => ResponseFormat::FluxCsv,
            InfluxLanguage::InfluxQl => ResponseFormat::InfluxQlJson,
        }
    }
}

#[async_trait]
impl Driver for InfluxDbDriver {
    fn name(&self) -> &str {
        "influxdb"
    }

    async fn connect(&self) -> Result<bool> {
        self.config.validate()?;
        info!(
            url = %self.config.url(),
            bucket = %self.config.bucket(),
            language = ?self.config.language(),
            "InfluxDB driver ready"
        );
        Ok(true)
    }

    #[instrument(skip(self, points), fields(points = points.len()))]
    async fn write_batch(&self, points: &[DataPoint]) -> Result<bool> {
        let payload = LineProtocolEncoder.encode_batch(points)?;
        send_write(self.transport.as_ref(), self.name(), payload, &self.log_config).await
    }

    #[instrument(skip(self, query), fields(measurement = %query.measurement()))]
    async fn query(&self, query: &Query) -> Result<QueryResult> {
        let raw = self.builder.build(query)?;
        run_query(
            self.transport.as_ref(),
            &raw,
            self.response_format(),
            &self.log_config,
        )
        .await
    }

    async fn create_database(&self, name: &str) -> Result<bool> {
        self.transport
            .send(&Command::CreateDatabase(name.to_string()))
            .await?;
        Ok(true)
    }

    async fn delete_database(&self, name: &str) -> Result<bool> {
        self.transport
            .send(&Command::DeleteDatabase(name.to_string()))
            .await?;
        Ok(true)
    }

    async fn delete_measurement(&self, measurement: &str) -> Result<bool> {
        self.transport
            .send(&Command::DeleteMeasurement(measurement.to_string()))
            .await?;
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        debug!("InfluxDB driver closed");
        Ok(())
    }
}

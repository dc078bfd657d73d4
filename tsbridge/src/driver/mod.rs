//! Drivers: one backend behind a common read/write interface.
//!
//! A driver composes a [`QueryBuilder`](crate::builder::QueryBuilder), a
//! write encoder from [`format`](crate::format), a response decoder from
//! [`parse`](crate::parse) and a [`Transport`](crate::transport::Transport).
//! [`AggregateDriver`] fans writes out to several drivers and
//! [`DriverRegistry`] creates drivers by name.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::log_query;
use crate::perf_debug;
use crate::logging::{truncate_field, LogConfig};
use crate::model::{DataPoint, QueryResult};
use crate::parse::ResponseFormat;
use crate::query::{Query, RawQuery};
use crate::transport::{Command, Transport};

pub mod aggregate;
pub mod config;
pub mod graphite;
pub mod influx;
pub mod prometheus;
pub mod registry;
pub mod rrd;

pub use aggregate::AggregateDriver;
pub use config::{
    DriverConfig, GraphiteConfig, InfluxConfig, InfluxLanguage, PrometheusConfig, RrdConfig,
    RrdStrategyConfig,
};
pub use graphite::GraphiteDriver;
pub use influx::InfluxDbDriver;
pub use prometheus::PrometheusDriver;
pub use registry::{DriverFactory, DriverRegistry};
pub use rrd::RrdDriver;

/// A time-series backend.
///
/// Mutating calls return `Ok(true)` when the backend accepted the request.
/// `Ok(false)` is reserved for requests that were delivered but had no
/// effect, or, for [`AggregateDriver`], for partial failures.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry name of the backend (`influxdb`, `rrdtool`, ...).
    fn name(&self) -> &str;

    /// Checks the configuration and prepares the driver for use.
    async fn connect(&self) -> Result<bool>;

    async fn write(&self, point: &DataPoint) -> Result<bool> {
        self.write_batch(std::slice::from_ref(point)).await
    }

    async fn write_batch(&self, points: &[DataPoint]) -> Result<bool>;

    /// Lowers `query`, executes it and decodes the response.
    async fn query(&self, query: &Query) -> Result<QueryResult>;

    async fn create_database(&self, name: &str) -> Result<bool>;

    async fn delete_database(&self, name: &str) -> Result<bool>;

    async fn delete_measurement(&self, measurement: &str) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

/// Executes a lowered query and decodes the body.
pub(crate) async fn run_query(
    transport: &dyn Transport,
    raw: &RawQuery,
    format: ResponseFormat,
    log_config: &LogConfig,
) -> Result<QueryResult> {
    log_query!(
        log_config,
        backend = raw.backend(),
        "Executing query: {}",
        truncate_field(&raw.to_string(), log_config.max_field_length)
    );
    let body = transport.execute(raw).await?;
    format.parse(&body)
}

/// Sends an encoded write payload; empty payloads are not sent.
pub(crate) async fn send_write(
    transport: &dyn Transport,
    backend: &str,
    payload: String,
    log_config: &LogConfig,
) -> Result<bool> {
    if payload.is_empty() {
        perf_debug!(log_config, backend, "Nothing to write");
        return Ok(true);
    }
    if log_config.log_writes {
        debug!(
            backend,
            "Writing payload: {}",
            truncate_field(&payload, log_config.max_field_length)
        );
    }
    transport.send(&Command::Write(payload)).await?;
    Ok(true)
}

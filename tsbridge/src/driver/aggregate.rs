//! Fan-out over several drivers.
//!
//! Writes and administrative calls go to every write database concurrently.
//! Reads go to the read database only.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, error, instrument};

use super::Driver;
use crate::error::{Result, TsdbError};
use crate::model::{DataPoint, QueryResult};
use crate::query::Query;

/// Mirrors writes to every write database and reads from one.
///
/// Each mutating call reports:
/// - `Ok(true)` when every write database returned `Ok(true)`;
/// - `Err(e)` when every write database failed with the same message `e`;
/// - `Ok(false)` otherwise. Individual failures are only logged.
///
/// ```rust
/// use std::sync::Arc;
/// use tsbridge::driver::{AggregateDriver, Driver, InfluxConfig, InfluxDbDriver};
/// use tsbridge::model::DataPoint;
/// use tsbridge::transport::MemoryTransport;
///
/// # #[tokio::main]
/// # async fn main() {
/// let primary = MemoryTransport::new("influxdb");
/// let backup = MemoryTransport::new("influxdb");
/// backup.fail_with("disk full").await;
///
/// let config = InfluxConfig::new("http://localhost:8086", "metrics");
/// let drivers: Vec<Arc<dyn Driver>> = vec![
///     Arc::new(InfluxDbDriver::new(config.clone(), Arc::new(primary)).unwrap()),
///     Arc::new(InfluxDbDriver::new(config, Arc::new(backup)).unwrap()),
/// ];
/// let aggregate = AggregateDriver::new(drivers).unwrap();
///
/// let point = DataPoint::new("cpu").field("value", 1.0);
/// assert!(!aggregate.write(&point).await.unwrap());
/// # }
/// ```
pub struct AggregateDriver {
    write_databases: Vec<Arc<dyn Driver>>,
    read_database: Option<Arc<dyn Driver>>,
}

impl AggregateDriver {
    /// # Errors
    ///
    /// Fails when `write_databases` is empty.
    pub fn new(write_databases: Vec<Arc<dyn Driver>>) -> Result<Self> {
        if write_databases.is_empty() {
            return Err(TsdbError::configuration(
                "aggregate driver needs at least one write database",
            ));
        }
        Ok(Self {
            write_databases,
            read_database: None,
        })
    }

    /// Routes reads to `driver` instead of the first write database.
    pub fn with_read_database(mut self, driver: Arc<dyn Driver>) -> Self {
        self.read_database = Some(driver);
        self
    }

    pub fn write_databases(&self) -> &[Arc<dyn Driver>] {
        &self.write_databases
    }

    pub fn read_database(&self) -> &Arc<dyn Driver> {
        // non-empty is checked in new()
        self.read_database
            .as_ref()
            .unwrap_or(&self.write_databases[0])
    }

    fn reads_from_writer(&self) -> bool {
        let reader = Arc::as_ptr(self.read_database()) as *const ();
        self.write_databases
            .iter()
            .any(|d| Arc::as_ptr(d) as *const () == reader)
    }

    /// Folds per-database outcomes into one.
    fn combine(&self, operation: &str, results: Vec<Result<bool>>) -> Result<bool> {
        let mut success = true;
        let mut failures = Vec::new();
        for (driver, result) in self.write_databases.iter().zip(results) {
            match result {
                Ok(accepted) => success &= accepted,
                Err(e) => {
                    error!(
                        driver = %driver.name(),
                        operation,
                        error = %e,
                        "Write database failed"
                    );
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            return Ok(success);
        }
        if failures.len() == self.write_databases.len() {
            let first = failures[0].to_string();
            if failures.iter().all(|e| e.to_string() == first) {
                return Err(failures.swap_remove(0));
            }
        }
        debug!(
            operation,
            failed = failures.len(),
            total = self.write_databases.len(),
            "Partial failure"
        );
        Ok(false)
    }
}

#[async_trait]
impl Driver for AggregateDriver {
    fn name(&self) -> &str {
        "aggregate"
    }

    async fn connect(&self) -> Result<bool> {
        let results = join_all(self.write_databases.iter().map(|d| d.connect())).await;
        let connected = self.combine("connect", results)?;
        if self.reads_from_writer() {
            return Ok(connected);
        }
        Ok(self.read_database().connect().await? && connected)
    }

    #[instrument(skip(self, point), fields(measurement = %point.measurement()))]
    async fn write(&self, point: &DataPoint) -> Result<bool> {
        let results = join_all(self.write_databases.iter().map(|d| d.write(point))).await;
        self.combine("write", results)
    }

    #[instrument(skip(self, points), fields(points = points.len()))]
    async fn write_batch(&self, points: &[DataPoint]) -> Result<bool> {
        let results = join_all(self.write_databases.iter().map(|d| d.write_batch(points))).await;
        self.combine("write_batch", results)
    }

    async fn query(&self, query: &Query) -> Result<QueryResult> {
        self.read_database().query(query).await
    }

    async fn create_database(&self, name: &str) -> Result<bool> {
        let results = join_all(self.write_databases.iter().map(|d| d.create_database(name))).await;
        self.combine("create_database", results)
    }

    async fn delete_database(&self, name: &str) -> Result<bool> {
        let results = join_all(self.write_databases.iter().map(|d| d.delete_database(name))).await;
        self.combine("delete_database", results)
    }

    async fn delete_measurement(&self, measurement: &str) -> Result<bool> {
        let results = join_all(
            self.write_databases
                .iter()
                .map(|d| d.delete_measurement(measurement)),
        )
        .await;
        self.combine("delete_measurement", results)
    }

    /// Closes every driver; the first failure is returned after all ran.
    async fn close(&self) -> Result<()> {
        let mut results = join_all(self.write_databases.iter().map(|d| d.close())).await;
        if !self.reads_from_writer() {
            results.push(self.read_database().close().await);
        }
        for result in &results {
            if let Err(e) = result {
                error!(error = %e, "Failed to close driver");
            }
        }
        results.into_iter().collect()
    }
}

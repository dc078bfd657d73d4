//! Name-based driver construction.
//!
//! The registry is an ordinary value: build it once at startup, register
//! custom factories next to the built-in ones and pass it to whatever creates
//! drivers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::config::DriverConfig;
use super::{Driver, GraphiteDriver, InfluxDbDriver, PrometheusDriver, RrdDriver};
use crate::error::{Result, TsdbError};
use crate::transport::Transport;

/// Creates a driver from its configuration and a transport.
pub type DriverFactory =
    Arc<dyn Fn(DriverConfig, Arc<dyn Transport>) -> Result<Arc<dyn Driver>> + Send + Sync>;

/// Maps driver names to factories.
///
/// ```rust
/// use std::sync::Arc;
/// use tsbridge::driver::{DriverConfig, DriverRegistry, PrometheusConfig};
/// use tsbridge::transport::MemoryTransport;
///
/// let registry = DriverRegistry::with_builtin_drivers();
/// let config = DriverConfig::from(PrometheusConfig::new("http://localhost:9090"));
/// let driver = registry
///     .create(config, Arc::new(MemoryTransport::new("prometheus")))
///     .unwrap();
/// assert_eq!(driver.name(), "prometheus");
/// ```
#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `influxdb`, `prometheus`, `graphite` and `rrdtool`.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register("influxdb", |config, transport| match config {
            DriverConfig::InfluxDb(c) => Ok(Arc::new(InfluxDbDriver::new(c, transport)?) as _),
            other => Err(mismatch("influxdb", &other)),
        });
        registry.register("prometheus", |config, transport| match config {
            DriverConfig::Prometheus(c) => Ok(Arc::new(PrometheusDriver::new(c, transport)?) as _),
            other => Err(mismatch("prometheus", &other)),
        });
        registry.register("graphite", |config, transport| match config {
            DriverConfig::Graphite(c) => Ok(Arc::new(GraphiteDriver::new(c, transport)?) as _),
            other => Err(mismatch("graphite", &other)),
        });
        registry.register("rrdtool", |config, transport| match config {
            DriverConfig::Rrd(c) => Ok(Arc::new(RrdDriver::new(c, transport)?) as _),
            other => Err(mismatch("rrdtool", &other)),
        });
        registry
    }

    /// Registers `factory` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(DriverConfig, Arc<dyn Transport>) -> Result<Arc<dyn Driver>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(driver = %name, "Registering driver");
        self.factories.insert(name, Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Creates the driver named by the config's `driver` tag.
    pub fn create(
        &self,
        config: DriverConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<dyn Driver>> {
        let name = config.driver_name();
        self.create_named(name, config, transport)
    }

    /// Creates the driver registered as `name`.
    ///
    /// # Errors
    ///
    /// Fails for unknown names and when the factory rejects the config.
    pub fn create_named(
        &self,
        name: &str,
        config: DriverConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<dyn Driver>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            TsdbError::configuration(format!(
                "unknown driver '{name}', registered: {}",
                self.names().join(", ")
            ))
        })?;
        factory(config, transport)
    }
}

fn mismatch(expected: &str, config: &DriverConfig) -> TsdbError {
    TsdbError::configuration(format!(
        "driver '{expected}' cannot use a '{}' config",
        config.driver_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{GraphiteConfig, RrdConfig};
    use crate::transport::MemoryTransport;

    fn transport() -> Arc<dyn Transport> {
        Arc::new(MemoryTransport::new("test"))
    }

    #[test]
    fn test_builtin_names() {
        let registry = DriverRegistry::with_builtin_drivers();
        assert_eq!(
            registry.names(),
            vec!["graphite", "influxdb", "prometheus", "rrdtool"]
        );
    }

    #[test]
    fn test_create_by_config() {
        let registry = DriverRegistry::with_builtin_drivers();
        let driver = registry
            .create(RrdConfig::new("/tmp/rrd").into(), transport())
            .unwrap();
        assert_eq!(driver.name(), "rrdtool");
    }

    #[test]
    fn test_mismatched_config() {
        let registry = DriverRegistry::with_builtin_drivers();
        let config: DriverConfig =
            GraphiteConfig::new("localhost", "http://localhost/render").into();
        assert!(matches!(
            registry.create_named("influxdb", config, transport()),
            Err(TsdbError::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_and_custom_driver() {
        let mut registry = DriverRegistry::new();
        let config: DriverConfig = RrdConfig::new("/tmp/rrd").into();
        assert!(registry.create(config.clone(), transport()).is_err());

        registry.register("rrdtool", |config, transport| match config {
            DriverConfig::Rrd(c) => Ok(Arc::new(RrdDriver::new(c, transport)?) as _),
            other => Err(mismatch("rrdtool", &other)),
        });
        assert!(registry.contains("rrdtool"));
        assert!(registry.create(config, transport()).is_ok());
    }
}

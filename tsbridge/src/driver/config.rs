//! Backend connection settings.
//!
//! Every config is a builder with private fields and is also
//! `Serialize`/`Deserialize`, so applications can keep driver settings in a
//! JSON file and load them with [`DriverConfig::from_json`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TsdbError};
use crate::security::SecureString;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn check_url(kind: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| TsdbError::configuration(format!("invalid {kind} url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(TsdbError::configuration(format!(
            "{kind} url must use http or https, got '{other}'"
        ))),
    }
}

/// Query language used against InfluxDB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfluxLanguage {
    #[default]
    Flux,
    InfluxQl,
}

/// InfluxDB 2.x connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    url: String,
    #[serde(default)]
    org: String,
    bucket: String,
    #[serde(default)]
    token: SecureString,
    #[serde(default)]
    language: InfluxLanguage,
    /// Database name for the InfluxQL compatibility endpoint.
    #[serde(default)]
    database: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

impl InfluxConfig {
    pub fn new(url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            org: String::new(),
            bucket: bucket.into(),
            token: SecureString::default(),
            language: InfluxLanguage::Flux,
            database: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = org.into();
        self
    }

    /// Set the API token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = SecureString::new(token.into());
        self
    }

    pub fn with_language(mut self, language: InfluxLanguage) -> Self {
        self.language = language;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn org(&self) -> &str {
        &self.org
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the API token.
    ///
    /// # Security
    /// Use `expose()` only when building the request header.
    pub fn token(&self) -> &SecureString {
        &self.token
    }

    pub fn language(&self) -> InfluxLanguage {
        self.language
    }

    /// InfluxQL database, falling back to the bucket name.
    pub fn database(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.bucket)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        check_url("influxdb", &self.url)?;
        if self.bucket.is_empty() {
            return Err(TsdbError::configuration("influxdb bucket cannot be empty"));
        }
        Ok(())
    }
}

/// Prometheus server and Pushgateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    url: String,
    #[serde(default)]
    pushgateway_url: Option<String>,
    #[serde(default = "default_job")]
    job: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_job() -> String {
    "tsbridge".to_string()
}

impl PrometheusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pushgateway_url: None,
            job: default_job(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Writes go to this Pushgateway; without one the driver is read-only.
    pub fn with_pushgateway(mut self, url: impl Into<String>) -> Self {
        self.pushgateway_url = Some(url.into());
        self
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pushgateway_url(&self) -> Option<&str> {
        self.pushgateway_url.as_deref()
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        check_url("prometheus", &self.url)?;
        if let Some(gateway) = &self.pushgateway_url {
            check_url("pushgateway", gateway)?;
        }
        if self.job.is_empty() {
            return Err(TsdbError::configuration("prometheus job cannot be empty"));
        }
        Ok(())
    }
}

/// Graphite carbon (plaintext writes) and render API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphiteConfig {
    host: String,
    #[serde(default = "default_carbon_port")]
    port: u16,
    render_url: String,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_carbon_port() -> u16 {
    2003
}

impl GraphiteConfig {
    pub fn new(host: impl Into<String>, render_url: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_carbon_port(),
            render_url: render_url.into(),
            prefix: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Path prefix for every metric written and queried.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn render_url(&self) -> &str {
        &self.render_url
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|p| !p.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(TsdbError::configuration("graphite host cannot be empty"));
        }
        if self.port == 0 {
            return Err(TsdbError::configuration("graphite port cannot be 0"));
        }
        check_url("graphite render", &self.render_url)
    }
}

/// How tags map onto RRD files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RrdStrategyConfig {
    /// Tags encoded in the file name.
    #[default]
    FileName,
    /// Listed tags become directories, the rest go in the file name.
    Folder { folder_tags: Vec<String> },
    /// One file per measurement.
    NoTags,
}

/// Local RRD storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrdConfig {
    base_dir: PathBuf,
    #[serde(default)]
    strategy: RrdStrategyConfig,
    #[serde(default = "default_step")]
    step_secs: u64,
    #[serde(default = "default_heartbeat")]
    heartbeat_secs: u64,
    #[serde(default = "default_rras")]
    rras: Vec<String>,
    /// `unix:/path` or `host:port` of an rrdcached daemon.
    #[serde(default)]
    rrdcached_address: Option<String>,
}

fn default_step() -> u64 {
    60
}

fn default_heartbeat() -> u64 {
    120
}

fn default_rras() -> Vec<String> {
    vec![
        "RRA:AVERAGE:0.5:1:1440".to_string(),
        "RRA:AVERAGE:0.5:5:2016".to_string(),
        "RRA:AVERAGE:0.5:60:8760".to_string(),
        "RRA:MAX:0.5:1:1440".to_string(),
        "RRA:MIN:0.5:1:1440".to_string(),
    ]
}

impl RrdConfig {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            strategy: RrdStrategyConfig::default(),
            step_secs: default_step(),
            heartbeat_secs: default_heartbeat(),
            rras: default_rras(),
            rrdcached_address: None,
        }
    }

    pub fn with_strategy(mut self, strategy: RrdStrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step_secs = step.as_secs();
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat_secs = heartbeat.as_secs();
        self
    }

    /// Replace the archive definitions used when creating files.
    pub fn with_rras<I, S>(mut self, rras: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rras = rras.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rrdcached(mut self, address: impl Into<String>) -> Self {
        self.rrdcached_address = Some(address.into());
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn strategy(&self) -> &RrdStrategyConfig {
        &self.strategy
    }

    pub fn step_secs(&self) -> u64 {
        self.step_secs
    }

    pub fn heartbeat_secs(&self) -> u64 {
        self.heartbeat_secs
    }

    pub fn rras(&self) -> &[String] {
        &self.rras
    }

    pub fn rrdcached_address(&self) -> Option<&str> {
        self.rrdcached_address.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(TsdbError::configuration("rrd base_dir cannot be empty"));
        }
        if self.step_secs == 0 {
            return Err(TsdbError::configuration("rrd step must be at least 1s"));
        }
        if self.heartbeat_secs < self.step_secs {
            return Err(TsdbError::configuration(format!(
                "rrd heartbeat ({}s) must not be shorter than the step ({}s)",
                self.heartbeat_secs, self.step_secs
            )));
        }
        if let Some(bad) = self.rras.iter().find(|r| !r.starts_with("RRA:")) {
            return Err(TsdbError::configuration(format!(
                "invalid archive definition '{bad}'"
            )));
        }
        if self.rras.is_empty() {
            return Err(TsdbError::configuration("rrd needs at least one RRA"));
        }
        if let RrdStrategyConfig::Folder { folder_tags } = &self.strategy {
            if folder_tags.is_empty() {
                return Err(TsdbError::configuration(
                    "folder strategy needs at least one folder tag",
                ));
            }
        }
        Ok(())
    }
}

/// Settings for any built-in driver, tagged by driver name.
///
/// ```rust
/// use tsbridge::driver::DriverConfig;
///
/// let config = DriverConfig::from_json(
///     r#"{"driver": "rrdtool", "base_dir": "/var/lib/rrd", "strategy": {"kind": "no_tags"}}"#,
/// ).unwrap();
/// assert_eq!(config.driver_name(), "rrdtool");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum DriverConfig {
    InfluxDb(InfluxConfig),
    Prometheus(PrometheusConfig),
    Graphite(GraphiteConfig),
    #[serde(rename = "rrdtool")]
    Rrd(RrdConfig),
}

impl DriverConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DriverConfig = serde_json::from_str(json)
            .map_err(|e| TsdbError::configuration(format!("invalid driver config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            DriverConfig::InfluxDb(_) => "influxdb",
            DriverConfig::Prometheus(_) => "prometheus",
            DriverConfig::Graphite(_) => "graphite",
            DriverConfig::Rrd(_) => "rrdtool",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            DriverConfig::InfluxDb(c) => c.validate(),
            DriverConfig::Prometheus(c) => c.validate(),
            DriverConfig::Graphite(c) => c.validate(),
            DriverConfig::Rrd(c) => c.validate(),
        }
    }
}

impl From<InfluxConfig> for DriverConfig {
    fn from(config: InfluxConfig) -> Self {
        DriverConfig::InfluxDb(config)
    }
}

impl From<PrometheusConfig> for DriverConfig {
    fn from(config: PrometheusConfig) -> Self {
        DriverConfig::Prometheus(config)
    }
}

impl From<GraphiteConfig> for DriverConfig {
    fn from(config: GraphiteConfig) -> Self {
        DriverConfig::Graphite(config)
    }
}

impl From<RrdConfig> for DriverConfig {
    fn from(config: RrdConfig) -> Self {
        DriverConfig::Rrd(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_influx_from_json_hides_token() {
        let config = DriverConfig::from_json(
            r#"{"driver":"influxdb","url":"http://localhost:8086","bucket":"metrics","token":"s3cret","language":"influxql"}"#,
        )
        .unwrap();
        let DriverConfig::InfluxDb(influx) = config else {
            panic!("expected influx config");
        };
        assert_eq!(influx.token().expose(), "s3cret");
        assert_eq!(influx.language(), InfluxLanguage::InfluxQl);
        assert_eq!(influx.database(), "metrics");
        assert_eq!(influx.timeout(), Duration::from_secs(30));
        assert!(!format!("{influx:?}").contains("s3cret"));
    }

    #[test]
    fn test_invalid_urls_rejected() {
        assert!(InfluxConfig::new("localhost:8086", "b").validate().is_err());
        assert!(PrometheusConfig::new("ftp://prom").validate().is_err());
        assert!(PrometheusConfig::new("http://prom:9090")
            .with_pushgateway("not a url")
            .validate()
            .is_err());
    }

    #[test]
    fn test_rrd_defaults_and_checks() {
        let config = RrdConfig::new("/tmp/rrd");
        assert!(config.validate().is_ok());
        assert_eq!(config.step_secs(), 60);

        let short_heartbeat = RrdConfig::new("/tmp/rrd").with_heartbeat(Duration::from_secs(30));
        assert!(short_heartbeat.validate().is_err());

        let empty_folders = RrdConfig::new("/tmp/rrd").with_strategy(RrdStrategyConfig::Folder {
            folder_tags: vec![],
        });
        assert!(empty_folders.validate().is_err());
    }

    #[test]
    fn test_folder_strategy_json() {
        let config = DriverConfig::from_json(
            r#"{"driver":"rrdtool","base_dir":"/data","strategy":{"kind":"folder","folder_tags":["region","host"]}}"#,
        )
        .unwrap();
        let DriverConfig::Rrd(rrd) = config else {
            panic!("expected rrd config");
        };
        assert_eq!(
            rrd.strategy(),
            &RrdStrategyConfig::Folder {
                folder_tags: vec!["region".into(), "host".into()]
            }
        );
    }

    #[test]
    fn test_unknown_driver() {
        assert!(matches!(
            DriverConfig::from_json(r#"{"driver":"opentsdb"}"#),
            Err(TsdbError::Configuration(_))
        ));
    }
}

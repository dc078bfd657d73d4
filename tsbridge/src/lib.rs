//! # tsbridge - one query model for several time-series databases
//!
//! tsbridge describes reads and writes once and lowers them to InfluxDB
//! (Flux or InfluxQL), Prometheus (PromQL), Graphite (render targets) and
//! RRDtool (`xport` stack programs).
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use tsbridge::prelude::*;
//!
//! # fn main() -> tsbridge::error::Result<()> {
//! let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
//! let query = Query::new("cpu_usage")
//!     .filter("host", Operator::Eq, "server1")
//!     .time_range(start, end);
//!
//! let flux = InfluxQueryBuilder::new("test_bucket").build(&query)?;
//! assert!(flux.query.contains(r#"r["host"] == "server1""#));
//!
//! let promql = PrometheusQueryBuilder::new().build(&query)?;
//! assert_eq!(promql.expr, r#"cpu_usage{host="server1"}"#);
//!
//! let graphite = GraphiteQueryBuilder::new().build(&query)?;
//! assert_eq!(graphite.target, "cpu_usage.server1");
//! # Ok(())
//! # }
//! ```
//!
//! ## Drivers
//!
//! A [`driver::Driver`] pairs a builder with a write encoder, a response
//! decoder and a [`transport::Transport`]. The transport is the only part
//! that talks to the network or runs `rrdtool`; [`transport::MemoryTransport`]
//! records traffic and replays canned responses.
//!
//! ```rust
//! use std::sync::Arc;
//! use tsbridge::prelude::*;
//! use tsbridge::driver::PrometheusConfig;
//! use tsbridge::transport::MemoryTransport;
//!
//! # #[tokio::main]
//! # async fn main() -> tsbridge::error::Result<()> {
//! let transport = MemoryTransport::new("prometheus");
//! transport
//!     .push_response(r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#)
//!     .await;
//!
//! let registry = DriverRegistry::with_builtin_drivers();
//! let driver = registry.create(
//!     PrometheusConfig::new("http://localhost:9090").into(),
//!     Arc::new(transport),
//! )?;
//! let result = driver.query(&Query::new("up")).await?;
//! assert!(result.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## RRD files and tags
//!
//! RRDtool stores one series per file. A [`rrd::TagStrategy`] maps each tag
//! set to a file: tags in the file name ([`rrd::FileNameStrategy`]), some
//! tags as directories ([`rrd::FolderStrategy`]) or no tags at all
//! ([`rrd::NoTagsStrategy`]). Conditions are matched against decoded tags
//! with [`rrd::TagSearch`], which evaluates AND/OR strictly left to right.
//!
//! ## Architecture
//!
//! - **`model`**: values, conditions, data points and query results
//! - **`query`**: the [`query::Query`] builder and the native [`query::RawQuery`] forms
//! - **`builder`**: one query builder per backend
//! - **`rrd`**: tag strategies, the file name codec and `TagSearch`
//! - **`format`**: write encoders (line protocol, plaintext, exposition, rrdtool args)
//! - **`parse`**: response decoders
//! - **`transport`**: the I/O seam
//! - **`driver`**: drivers, fan-out and the registry

pub mod builder;
pub mod driver;
pub mod error;
pub mod format;
pub mod logging;
pub mod model;
pub mod parse;
pub mod prelude;
pub mod query;
pub mod rrd;
pub mod security;
pub mod transport;

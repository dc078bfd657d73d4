//! Lowering of [`Query`] into backend-native queries.
//!
//! Each backend has one builder. Builders are pure: they perform no I/O except
//! the RRD builder, which asks its [`TagStrategy`](crate::rrd::TagStrategy) to
//! scan the filesystem for matching files. Clauses a backend cannot express
//! are dropped with a `trace!` event rather than raising.

use crate::error::Result;
use crate::query::{Query, RawQuery};

pub mod graphite;
pub mod influx;
pub mod influxql;
pub mod prometheus;
pub mod rrd;

pub use graphite::GraphiteQueryBuilder;
pub use influx::InfluxQueryBuilder;
pub use influxql::InfluxQlQueryBuilder;
pub use prometheus::PrometheusQueryBuilder;
pub use rrd::{RrdQueryBuilder, VarAllocator};

/// Lowers a [`Query`] into one backend's native form.
pub trait QueryBuilder {
    /// Backend-specific lowered query.
    type Raw: Into<RawQuery>;

    /// Translates `query`.
    ///
    /// Calling this twice on an unchanged query yields identical output.
    ///
    /// # Errors
    ///
    /// Fails when the query does not validate or uses a feature the backend
    /// rejects outright (see each builder).
    fn build(&self, query: &Query) -> Result<Self::Raw>;
}

/// Any of the built-in builders, dispatching to [`RawQuery`].
#[derive(Debug, Clone)]
pub enum AnyQueryBuilder {
    Influx(InfluxQueryBuilder),
    InfluxQl(InfluxQlQueryBuilder),
    Prometheus(PrometheusQueryBuilder),
    Graphite(GraphiteQueryBuilder),
    Rrd(RrdQueryBuilder),
}

impl AnyQueryBuilder {
    pub fn build(&self, query: &Query) -> Result<RawQuery> {
        match self {
            AnyQueryBuilder::Influx(b) => b.build(query).map(Into::into),
            AnyQueryBuilder::InfluxQl(b) => b.build(query).map(Into::into),
            AnyQueryBuilder::Prometheus(b) => b.build(query).map(Into::into),
            AnyQueryBuilder::Graphite(b) => b.build(query).map(Into::into),
            AnyQueryBuilder::Rrd(b) => b.build(query).map(Into::into),
        }
    }
}

impl From<InfluxQueryBuilder> for AnyQueryBuilder {
    fn from(builder: InfluxQueryBuilder) -> Self {
        AnyQueryBuilder::Influx(builder)
    }
}

impl From<InfluxQlQueryBuilder> for AnyQueryBuilder {
    fn from(builder: InfluxQlQueryBuilder) -> Self {
        AnyQueryBuilder::InfluxQl(builder)
    }
}

impl From<PrometheusQueryBuilder> for AnyQueryBuilder {
    fn from(builder: PrometheusQueryBuilder) -> Self {
        AnyQueryBuilder::Prometheus(builder)
    }
}

impl From<GraphiteQueryBuilder> for AnyQueryBuilder {
    fn from(builder: GraphiteQueryBuilder) -> Self {
        AnyQueryBuilder::Graphite(builder)
    }
}

impl From<RrdQueryBuilder> for AnyQueryBuilder {
    fn from(builder: RrdQueryBuilder) -> Self {
        AnyQueryBuilder::Rrd(builder)
    }
}

/// Double-quoted string literal with `\` and `"` escaped.
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Formats a number without a trailing `.0` for whole values.
pub(crate) fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

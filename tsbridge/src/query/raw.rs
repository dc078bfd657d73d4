//! Lowered, backend-native queries ready for a transport.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::time::format_iso;
use crate::error::{Result, TsdbError};

/// A native query produced by one of the query builders.
///
/// The backend set is fixed, so this is a closed enum rather than a trait
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RawQuery {
    Influx(InfluxRawQuery),
    Prometheus(PrometheusRawQuery),
    Graphite(GraphiteRawQuery),
    Rrd(RrdRawQuery),
}

impl RawQuery {
    /// Short backend name (`influxdb`, `prometheus`, `graphite`, `rrdtool`).
    pub fn backend(&self) -> &'static str {
        match self {
            RawQuery::Influx(_) => "influxdb",
            RawQuery::Prometheus(_) => "prometheus",
            RawQuery::Graphite(_) => "graphite",
            RawQuery::Rrd(_) => "rrdtool",
        }
    }

    pub fn as_influx(&self) -> Option<&InfluxRawQuery> {
        match self {
            RawQuery::Influx(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_prometheus(&self) -> Option<&PrometheusRawQuery> {
        match self {
            RawQuery::Prometheus(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_graphite(&self) -> Option<&GraphiteRawQuery> {
        match self {
            RawQuery::Graphite(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_rrd(&self) -> Option<&RrdRawQuery> {
        match self {
            RawQuery::Rrd(q) => Some(q),
            _ => None,
        }
    }
}

impl fmt::Display for RawQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawQuery::Influx(q) => f.write_str(&q.query),
            RawQuery::Prometheus(q) => f.write_str(&q.query_string()),
            RawQuery::Graphite(q) => f.write_str(&q.query_string()),
            RawQuery::Rrd(q) => f.write_str(&q.command_line()),
        }
    }
}

impl From<InfluxRawQuery> for RawQuery {
    fn from(query: InfluxRawQuery) -> Self {
        RawQuery::Influx(query)
    }
}

impl From<PrometheusRawQuery> for RawQuery {
    fn from(query: PrometheusRawQuery) -> Self {
        RawQuery::Prometheus(query)
    }
}

impl From<GraphiteRawQuery> for RawQuery {
    fn from(query: GraphiteRawQuery) -> Self {
        RawQuery::Graphite(query)
    }
}

impl From<RrdRawQuery> for RawQuery {
    fn from(query: RrdRawQuery) -> Self {
        RawQuery::Rrd(query)
    }
}

/// A Flux pipeline or an InfluxQL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluxRawQuery {
    pub query: String,
    /// `false` for InfluxQL.
    pub flux: bool,
}

impl InfluxRawQuery {
    pub fn flux(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            flux: true,
        }
    }

    pub fn influxql(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            flux: false,
        }
    }
}

/// A PromQL expression plus the range metadata the HTTP API needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrometheusRawQuery {
    pub expr: String,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Relative window such as `-1h`, only set without an absolute start.
    pub relative: Option<String>,
    /// Resolution step in seconds for range queries.
    pub step: Option<u64>,
    pub limit: Option<usize>,
}

impl PrometheusRawQuery {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            start: None,
            end: None,
            relative: None,
            step: None,
            limit: None,
        }
    }

    /// Expression followed by `# time range`, `# relative time` and `# limit`
    /// comments.
    ///
    /// The comments carry request parameters to the transport; they are not
    /// PromQL.
    pub fn query_string(&self) -> String {
        let mut out = self.expr.clone();
        match (&self.start, &self.end, &self.relative) {
            (Some(start), Some(end), _) => {
                out.push_str(&format!(
                    " # time range: {} to {}",
                    format_iso(start),
                    format_iso(end)
                ));
            }
            (Some(start), None, _) => {
                out.push_str(&format!(" # time range: {} to now", format_iso(start)));
            }
            (None, _, Some(relative)) => {
                out.push_str(&format!(" # relative time: {relative}"));
            }
            _ => {}
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!(" # limit: {limit}"));
        }
        out
    }

    /// True when the query spans a range rather than a single instant.
    pub fn is_range(&self) -> bool {
        self.start.is_some() || self.relative.is_some()
    }
}

/// A Graphite render API request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphiteRawQuery {
    pub target: String,
    pub from: Option<String>,
    pub until: Option<String>,
}

impl GraphiteRawQuery {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            from: None,
            until: None,
        }
    }

    /// Form-encoded `target`, `from`, `until` and `format=json` parameters.
    pub fn query_string(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        serializer.append_pair("target", &self.target);
        if let Some(from) = &self.from {
            serializer.append_pair("from", from);
        }
        if let Some(until) = &self.until {
            serializer.append_pair("until", until);
        }
        serializer.append_pair("format", "json");
        serializer.finish()
    }
}

/// One element of an RRDtool argument list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum RrdToken {
    /// A plain flag or flag value (`--start`, `end-3600s`).
    Arg(String),
    /// Body of a `DEF:` binding.
    Def(String),
    /// Body of a `CDEF:` binding.
    Cdef(String),
    /// Body of a `VDEF:` binding.
    Vdef(String),
    /// Body of an `XPORT:` output.
    Xport(String),
}

impl RrdToken {
    /// Position class: flags, then DEFs, then CDEF/VDEFs, then XPORTs.
    fn rank(&self) -> u8 {
        match self {
            RrdToken::Arg(_) => 0,
            RrdToken::Def(_) => 1,
            RrdToken::Cdef(_) | RrdToken::Vdef(_) => 2,
            RrdToken::Xport(_) => 3,
        }
    }

    /// The argument exactly as rrdtool receives it.
    pub fn render(&self) -> String {
        match self {
            RrdToken::Arg(arg) => arg.clone(),
            RrdToken::Def(body) => format!("DEF:{body}"),
            RrdToken::Cdef(body) => format!("CDEF:{body}"),
            RrdToken::Vdef(body) => format!("VDEF:{body}"),
            RrdToken::Xport(body) => format!("XPORT:{body}"),
        }
    }
}

impl fmt::Display for RrdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// An rrdtool invocation such as `xport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RrdRawQuery {
    command: String,
    output_path: Option<String>,
    args: Vec<RrdToken>,
}

impl RrdRawQuery {
    /// Creates the invocation after checking the definition order.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a token appears after one of a later
    /// class, e.g. a `DEF` after a `CDEF`; rrdtool rejects use before
    /// definition.
    pub fn new(
        command: impl Into<String>,
        output_path: Option<String>,
        args: Vec<RrdToken>,
    ) -> Result<Self> {
        if let Some(pair) = args.windows(2).find(|w| w[0].rank() > w[1].rank()) {
            return Err(TsdbError::configuration(format!(
                "rrdtool argument '{}' must not follow '{}'",
                pair[1], pair[0]
            )));
        }
        Ok(Self {
            command: command.into(),
            output_path,
            args,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn output_path(&self) -> Option<&str> {
        self.output_path.as_deref()
    }

    pub fn args(&self) -> &[RrdToken] {
        &self.args
    }

    /// Rendered arguments, without the command itself.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        if let Some(path) = &self.output_path {
            argv.push(path.clone());
        }
        argv.extend(self.args.iter().map(RrdToken::render));
        argv
    }

    /// Space-joined command line, for logging.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.command.clone()];
        parts.extend(self.argv());
        parts.join(" ")
    }
}

//! End-to-end lowering of one query into every backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tsbridge::builder::{
    AnyQueryBuilder, GraphiteQueryBuilder, InfluxQlQueryBuilder, InfluxQueryBuilder,
    PrometheusQueryBuilder, QueryBuilder, RrdQueryBuilder,
};
use tsbridge::error::TsdbError;
use tsbridge::model::{Operator, Value};
use tsbridge::query::{Query, RawQuery};
use tsbridge::rrd::{FileNameStrategy, TagStrategy};

fn hour() -> (DateTime<Utc>, DateTime<Utc>) {
    (
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
    )
}

fn server1_query() -> Query {
    let (t0, t1) = hour();
    Query::new("cpu_usage")
        .filter("host", Operator::Eq, "server1")
        .time_range(t0, t1)
}

#[test]
fn test_influx_exact_output() {
    let raw = InfluxQueryBuilder::new("test_bucket")
        .build(&server1_query())
        .unwrap();
    assert_eq!(
        raw.query,
        "from(bucket: \"test_bucket\")\n  |> range(start: 2024-01-01T00:00:00Z, stop: 2024-01-01T01:00:00Z)\n  |> filter(fn: (r) => r._measurement == \"cpu_usage\")\n  |> filter(fn: (r) => r[\"host\"] == \"server1\")"
    );
}

#[test]
fn test_prometheus_exact_output() {
    let raw = PrometheusQueryBuilder::new()
        .build(&server1_query())
        .unwrap();
    assert_eq!(
        raw.query_string(),
        "cpu_usage{host=\"server1\"} # time range: 2024-01-01T00:00:00Z to 2024-01-01T01:00:00Z"
    );
}

#[test]
fn test_graphite_exact_output() {
    let raw = GraphiteQueryBuilder::new().build(&server1_query()).unwrap();
    let decoded: Vec<String> = url::form_urlencoded::parse(raw.query_string().as_bytes())
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    assert_eq!(
        decoded.join("&"),
        "target=cpu_usage.server1&from=1704067200&until=1704070800&format=json"
    );
}

#[test]
fn test_influxql_output() {
    let raw = InfluxQlQueryBuilder::new().build(&server1_query()).unwrap();
    assert!(!raw.flux);
    assert_eq!(
        raw.query,
        "SELECT * FROM \"cpu_usage\" WHERE \"host\" = 'server1' AND time >= '2024-01-01T00:00:00Z' AND time <= '2024-01-01T01:00:00Z'"
    );
}

#[test]
fn test_minimal_forms() {
    let query = Query::new("m");
    assert_eq!(
        InfluxQueryBuilder::new("b").build(&query).unwrap().query,
        "from(bucket: \"b\")\n  |> range(start: 0)\n  |> filter(fn: (r) => r._measurement == \"m\")"
    );
    assert_eq!(PrometheusQueryBuilder::new().build(&query).unwrap().expr, "m");
    assert_eq!(GraphiteQueryBuilder::new().build(&query).unwrap().target, "m.*");
}

#[test]
fn test_rrd_uses_resolved_file() {
    let dir = TempDir::new().unwrap();
    let strategy = Arc::new(FileNameStrategy::new(dir.path()));
    let mut tags = BTreeMap::new();
    tags.insert("host".to_string(), Value::from("server1"));
    let path = strategy.file_path("cpu_usage", &tags).unwrap();
    std::fs::write(&path, b"").unwrap();

    let raw = RrdQueryBuilder::new(strategy)
        .build(&server1_query())
        .unwrap();
    assert_eq!(
        raw.command_line(),
        format!(
            "xport --json --start 1704067200 --end 1704070800 DEF:v1={}:value:AVERAGE XPORT:v1:value",
            path.display()
        )
    );
}

#[test]
fn test_rrd_without_files_fails() {
    let dir = TempDir::new().unwrap();
    let builder = RrdQueryBuilder::new(Arc::new(FileNameStrategy::new(dir.path())));
    assert!(matches!(
        builder.build(&server1_query()),
        Err(TsdbError::TagResolution(_))
    ));
}

#[test]
fn test_any_builder_dispatch() {
    let builders: Vec<AnyQueryBuilder> = vec![
        InfluxQueryBuilder::new("b").into(),
        InfluxQlQueryBuilder::new().into(),
        PrometheusQueryBuilder::new().into(),
        GraphiteQueryBuilder::new().into(),
    ];
    let backends: Vec<&str> = builders
        .iter()
        .map(|b| b.build(&server1_query()).unwrap())
        .map(|raw: RawQuery| raw.backend())
        .collect();
    assert_eq!(backends, vec!["influxdb", "influxdb", "prometheus", "graphite"]);
}

#[test]
fn test_invalid_query_rejected_everywhere() {
    let (t0, t1) = hour();
    let backwards = Query::new("cpu").time_range(t1, t0);
    assert!(matches!(
        InfluxQueryBuilder::new("b").build(&backwards),
        Err(TsdbError::InvalidQuery { .. })
    ));
    assert!(PrometheusQueryBuilder::new().build(&backwards).is_err());
    assert!(GraphiteQueryBuilder::new().build(&backwards).is_err());
    assert!(InfluxQlQueryBuilder::new().build(&Query::new("")).is_err());
}

#[test]
fn test_bad_percentile_is_configuration_error() {
    let query = Query::new("cpu").percentile("value", 120.0);
    assert!(matches!(
        PrometheusQueryBuilder::new().build(&query),
        Err(TsdbError::Configuration(_))
    ));
}

#[test]
fn test_oversized_interval_is_configuration_error() {
    let query = Query::new("cpu")
        .group_by_time("99999999999999999w")
        .avg("value");
    assert!(matches!(query.validate(), Err(TsdbError::Configuration(_))));
    assert!(matches!(
        PrometheusQueryBuilder::new().build(&query),
        Err(TsdbError::Configuration(_))
    ));
    assert!(InfluxQueryBuilder::new("b").build(&query).is_err());
    assert!(GraphiteQueryBuilder::new().build(&query).is_err());

    let dir = TempDir::new().unwrap();
    let builder = RrdQueryBuilder::new(Arc::new(FileNameStrategy::new(dir.path())));
    assert!(matches!(
        builder.build(&query),
        Err(TsdbError::Configuration(_))
    ));
}

#[test]
fn test_graphite_or_equalities_select_both_hosts() {
    let query = Query::new("cpu")
        .filter("host", Operator::Eq, "a")
        .or_filter("host", Operator::Eq, "b");
    let raw = GraphiteQueryBuilder::new().build(&query).unwrap();
    assert_eq!(raw.target, "cpu.{a,b}");
}

#[test]
fn test_flux_offset_is_never_dropped() {
    let builder = InfluxQueryBuilder::new("b");
    assert!(matches!(
        builder.build(&Query::new("cpu").offset(10)),
        Err(TsdbError::Configuration(_))
    ));
    let raw = builder.build(&Query::new("cpu").limit(5).offset(10)).unwrap();
    assert!(raw.query.ends_with("|> limit(n: 5, offset: 10)"));
}

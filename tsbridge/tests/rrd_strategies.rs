//! Tag strategies against a real directory tree.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tsbridge::driver::{Driver, RrdConfig, RrdDriver, RrdStrategyConfig};
use tsbridge::error::TsdbError;
use tsbridge::model::{DataPoint, Operator, QueryCondition, Value};
use tsbridge::rrd::{FileNameStrategy, FolderStrategy, NoTagsStrategy, TagStrategy};
use tsbridge::transport::{Command, MemoryTransport};

fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

fn touch(strategy: &dyn TagStrategy, measurement: &str, pairs: &[(&str, &str)]) -> PathBuf {
    let path = strategy.file_path(measurement, &tags(pairs)).unwrap();
    fs::write(&path, b"").unwrap();
    path
}

#[test]
fn test_folder_strategy_layout() {
    let dir = TempDir::new().unwrap();
    let strategy = FolderStrategy::new(dir.path(), ["region", "host"]);

    let path = strategy
        .file_path(
            "cpu_usage",
            &tags(&[("region", "us-east"), ("host", "server1"), ("env", "prod")]),
        )
        .unwrap();
    assert_eq!(
        path,
        dir.path().join("us-east").join("server1").join("cpu_usage_env-prod.rrd")
    );
    assert!(dir.path().join("us-east/server1").is_dir());

    // asking again reuses the same directories
    let again = strategy
        .file_path(
            "cpu_usage",
            &tags(&[("env", "prod"), ("host", "server1"), ("region", "us-east")]),
        )
        .unwrap();
    assert_eq!(again, path);

    let unset = strategy
        .file_path("cpu_usage", &tags(&[("host", "server1")]))
        .unwrap();
    assert_eq!(unset, dir.path().join("_unset/server1/cpu_usage.rrd"));
}

#[test]
fn test_folder_strategy_resolves_by_folder_and_file_tags() {
    let dir = TempDir::new().unwrap();
    let strategy = FolderStrategy::new(dir.path(), ["region"]);
    touch(&strategy, "cpu", &[("region", "eu"), ("env", "prod")]);
    let dev = touch(&strategy, "cpu", &[("region", "eu"), ("env", "dev")]);
    touch(&strategy, "cpu", &[("region", "us"), ("env", "dev")]);
    touch(&strategy, "mem", &[("region", "eu"), ("env", "dev")]);

    let conditions = [
        QueryCondition::new("region", Operator::Eq, "eu"),
        QueryCondition::new("env", Operator::Eq, "dev"),
    ];
    assert_eq!(strategy.resolve_file_paths("cpu", &conditions).unwrap(), vec![dev]);
    assert_eq!(strategy.resolve_file_paths("cpu", &[]).unwrap().len(), 3);
    assert_eq!(
        strategy.find_measurements_by_tags(&conditions).unwrap(),
        vec!["cpu", "mem"]
    );
}

#[test]
fn test_file_name_strategy_or_chain() {
    let dir = TempDir::new().unwrap();
    let strategy = FileNameStrategy::new(dir.path());
    let a = touch(&strategy, "cpu", &[("host", "a"), ("env", "prod")]);
    let b = touch(&strategy, "cpu", &[("host", "b"), ("env", "dev")]);
    touch(&strategy, "cpu", &[("host", "c"), ("env", "prod")]);

    // (host = a OR host = b) AND env = prod, evaluated left to right
    let chain = [
        QueryCondition::new("host", Operator::Eq, "a"),
        QueryCondition::or("host", Operator::Eq, "b"),
        QueryCondition::new("env", Operator::Eq, "prod"),
    ];
    assert_eq!(strategy.resolve_file_paths("cpu", &chain).unwrap(), vec![a.clone()]);

    // host = a OR host = b alone
    let either = [
        QueryCondition::new("host", Operator::Eq, "a"),
        QueryCondition::or("host", Operator::Eq, "b"),
    ];
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(strategy.resolve_file_paths("cpu", &either).unwrap(), expected);
}

#[test]
fn test_file_name_strategy_ignores_prefix_measurements() {
    let dir = TempDir::new().unwrap();
    let strategy = FileNameStrategy::new(dir.path());
    let cpu = touch(&strategy, "cpu", &[("host", "a")]);
    touch(&strategy, "cpu2", &[("host", "a")]);

    assert_eq!(strategy.resolve_file_paths("cpu", &[]).unwrap(), vec![cpu]);
}

#[test]
fn test_unsupported_operator_fails() {
    let dir = TempDir::new().unwrap();
    let strategy = FileNameStrategy::new(dir.path());
    touch(&strategy, "cpu", &[("host", "a")]);
    let err = strategy
        .resolve_file_paths("cpu", &[QueryCondition::new("host", Operator::Gt, "a")])
        .unwrap_err();
    assert!(matches!(err, TsdbError::TagResolution(_)));
}

#[test]
fn test_list_tag_cannot_be_encoded() {
    let dir = TempDir::new().unwrap();
    let strategy = FileNameStrategy::new(dir.path());
    let mut list = BTreeMap::new();
    list.insert("host".to_string(), Value::from(vec!["a", "b"]));
    assert!(matches!(
        strategy.file_path("cpu", &list),
        Err(TsdbError::TagResolution(_))
    ));
}

#[test]
fn test_no_tags_strategy_single_file() {
    let dir = TempDir::new().unwrap();
    let strategy = NoTagsStrategy::new(dir.path());
    assert!(strategy.resolve_file_paths("load", &[]).unwrap().is_empty());

    let path = touch(&strategy, "load", &[("host", "ignored")]);
    assert_eq!(path, dir.path().join("load.rrd"));
    assert_eq!(
        strategy
            .resolve_file_paths("load", &[QueryCondition::new("host", Operator::Eq, "x")])
            .unwrap(),
        vec![path]
    );
    assert_eq!(strategy.find_measurements_by_tags(&[]).unwrap(), vec!["load"]);
}

#[tokio::test]
async fn test_driver_writes_into_folder_layout() {
    let dir = TempDir::new().unwrap();
    let transport = MemoryTransport::new("rrdtool");
    let config = RrdConfig::new(dir.path()).with_strategy(RrdStrategyConfig::Folder {
        folder_tags: vec!["region".into(), "host".into()],
    });
    let driver = RrdDriver::new(config, Arc::new(transport.clone())).unwrap();

    let point = DataPoint::new("cpu_usage")
        .tag("region", "us-east")
        .tag("host", "server1")
        .tag("env", "prod")
        .field("value", 42.0);
    assert!(driver.write(&point).await.unwrap());

    let expected = dir
        .path()
        .join("us-east/server1/cpu_usage_env-prod.rrd")
        .to_string_lossy()
        .into_owned();
    let commands = transport.commands().await;
    assert_eq!(commands.len(), 2);
    for command in &commands {
        let Command::Rrd { args, .. } = command else {
            panic!("expected rrdtool commands, got {command:?}");
        };
        assert_eq!(args[0], expected);
    }
}

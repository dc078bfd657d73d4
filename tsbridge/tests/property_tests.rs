//! Property-based tests for the tag codec, tag search and query builders.
//!
//! - FileNameStrategy: encoding a tag set, decoding the file name and encoding
//!   again yields the same path.
//! - TagSearch: a single condition matches the same way whether it is joined
//!   with AND or OR.
//! - Builders: building the same query twice yields identical output.

use std::collections::BTreeMap;

use proptest::prelude::*;
use tempfile::TempDir;
use tsbridge::builder::{
    GraphiteQueryBuilder, InfluxQlQueryBuilder, InfluxQueryBuilder, PrometheusQueryBuilder,
    QueryBuilder,
};
use tsbridge::model::{Connective, Operator, QueryCondition, Value};
use tsbridge::query::{AggregateFunction, Aggregation, Query};
use tsbridge::rrd::codec::decode_for_measurement;
use tsbridge::rrd::{FileNameStrategy, TagMap, TagSearch, TagStrategy};

fn measurement() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,7}"
}

fn tag_map() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z][a-z0-9_.-]{0,6}", "[a-zA-Z0-9_.-]{1,6}", 0..4)
}

fn as_values(tags: &BTreeMap<String, String>) -> BTreeMap<String, Value> {
    tags.iter()
        .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
        .collect()
}

fn operator() -> impl Strategy<Value = Operator> {
    prop_oneof![
        Just(Operator::Eq),
        Just(Operator::NotEq),
        Just(Operator::In),
        Just(Operator::NotIn),
        Just(Operator::Regex),
    ]
}

fn condition() -> impl Strategy<Value = QueryCondition> {
    (
        prop_oneof![Just("host"), Just("env"), Just("missing")],
        operator(),
        "[a-c]{1,2}",
    )
        .prop_map(|(field, operator, value)| match operator {
            Operator::In | Operator::NotIn => {
                QueryCondition::new(field, operator, vec![value, "b".to_string()])
            }
            Operator::Regex => QueryCondition::new(field, operator, format!("^{value}")),
            _ => QueryCondition::new(field, operator, value),
        })
}

fn query() -> impl Strategy<Value = Query> {
    (
        measurement(),
        prop::option::of(condition()),
        prop::option::of(prop_oneof![
            Just(AggregateFunction::Avg),
            Just(AggregateFunction::Max),
            Just(AggregateFunction::Sum),
            Just(AggregateFunction::Percentile(90.0)),
        ]),
        prop::option::of(1usize..100),
        any::<bool>(),
    )
        .prop_map(|(m, condition, function, limit, grouped)| {
            let mut query = Query::new(m).latest("1h");
            if let Some(condition) = condition {
                query = query.condition(condition);
            }
            if let Some(function) = function {
                query = query.aggregate(Aggregation::new(function).on("value"));
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            if grouped {
                query = query.group_by_time("5m").group_by(["host"]);
            }
            query
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn file_name_round_trip(m in measurement(), tags in tag_map()) {
        let dir = TempDir::new().unwrap();
        let strategy = FileNameStrategy::new(dir.path());

        let path = strategy.file_path(&m, &as_values(&tags)).unwrap();
        let stem = path.file_stem().unwrap().to_str().unwrap().to_string();
        let decoded: TagMap = decode_for_measurement(&stem, &m).unwrap();
        prop_assert_eq!(&decoded, &tags);

        let again = strategy.file_path(&m, &as_values(&decoded)).unwrap();
        prop_assert_eq!(again, path);
    }

    #[test]
    fn single_condition_and_or_agree(tags in tag_map(), condition in condition()) {
        let tags: TagMap = tags;
        let and = [condition.clone().with_connective(Connective::And)];
        let or = [condition.with_connective(Connective::Or)];
        prop_assert_eq!(
            TagSearch::matches(&tags, &and).unwrap(),
            TagSearch::matches(&tags, &or).unwrap()
        );
    }

    #[test]
    fn builds_are_idempotent(query in query()) {
        let influx = InfluxQueryBuilder::new("bucket");
        prop_assert_eq!(influx.build(&query).unwrap(), influx.build(&query).unwrap());

        let influxql = InfluxQlQueryBuilder::new();
        prop_assert_eq!(influxql.build(&query).unwrap(), influxql.build(&query).unwrap());

        let prometheus = PrometheusQueryBuilder::new();
        prop_assert_eq!(prometheus.build(&query).unwrap(), prometheus.build(&query).unwrap());

        let graphite = GraphiteQueryBuilder::new().with_prefix("stats");
        prop_assert_eq!(graphite.build(&query).unwrap(), graphite.build(&query).unwrap());
    }
}

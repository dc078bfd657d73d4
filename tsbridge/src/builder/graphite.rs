//! Graphite render target lowering.
//!
//! Targets are function trees composed inside out: path, regex filters,
//! consolidation, bucketing, alias, fill, sorting and finally limit.

use tracing::{debug, instrument, trace};

use super::{format_number, quote, QueryBuilder};
use crate::error::Result;
use crate::model::{is_conjunctive, Connective, Operator, QueryCondition};
use crate::query::{
    AggregateFunction, Aggregation, FillPolicy, GraphiteRawQuery, Interval, Query, SortDirection,
};

/// Builds Graphite render API requests.
#[derive(Debug, Clone, Default)]
pub struct GraphiteQueryBuilder {
    prefix: Option<String>,
}

impl GraphiteQueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends `prefix.` to every metric path.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn selection(&self, query: &Query) -> Result<String> {
        let mut segments: Vec<String> = self.prefix.iter().cloned().collect();
        segments.push(query.measurement().to_string());

        let conditions: &[QueryCondition] = match path_levels(query.conditions())? {
            Some(levels) => {
                if levels.is_empty() {
                    segments.push("*".to_string());
                }
                segments.extend(levels);
                query.conditions()
            }
            None => {
                trace!("OR-joined conditions have no Graphite path form, selecting every series");
                segments.push("*".to_string());
                &[]
            }
        };
        let path = segments.join(".");
        let fields = query.explicit_fields();

        let mut target = match fields.as_slice() {
            [] => path,
            [field] => format!("{path}.{field}"),
            many => {
                let paths: Vec<String> = many
                    .iter()
                    .map(|f| quote(&format!("{path}.{f}")))
                    .collect();
                format!("group({})", paths.join(", "))
            }
        };

        for condition in conditions {
            match condition.operator {
                Operator::Eq => {}
                Operator::Regex => {
                    target = format!(
                        "grep({target}, {})",
                        quote(&condition.value.to_tag_string()?)
                    );
                }
                _ => trace!(%condition, "no Graphite function for condition, path unchanged"),
            }
        }
        Ok(target)
    }
}

impl QueryBuilder for GraphiteQueryBuilder {
    type Raw = GraphiteRawQuery;

    #[instrument(skip(self, query), fields(measurement = %query.measurement()))]
    fn build(&self, query: &Query) -> Result<GraphiteRawQuery> {
        query.validate()?;

        let selection = self.selection(query)?;
        let interval = query.interval()?;
        let default_field = query.default_field();

        let mut target = match query.aggregations() {
            [] => match interval {
                Some(interval) => summarize(&selection, &interval, "avg"),
                None => selection,
            },
            [single] => aggregate(&selection, single, interval.as_ref(), default_field)?,
            many => {
                let parts = many
                    .iter()
                    .map(|a| aggregate(&selection, a, interval.as_ref(), default_field))
                    .collect::<Result<Vec<_>>>()?;
                format!("group({})", parts.join(","))
            }
        };

        match query.fill_policy() {
            FillPolicy::Value(v) => {
                target = format!("transformNull({target}, {})", format_number(v))
            }
            FillPolicy::Previous => target = format!("keepLastValue({target})"),
            FillPolicy::Null | FillPolicy::None => {}
        }

        for order in query.order() {
            target = match order.direction {
                SortDirection::Asc => format!("sortByMinima({target})"),
                SortDirection::Desc => format!("sortByMaxima({target})"),
            };
        }

        if let Some(limit) = query.get_limit() {
            target = format!("limit({target}, {limit})");
        }

        if query.having_clause().is_some()
            || query.get_offset().is_some()
            || query.distinct_fields().is_some()
            || query.math_expression().is_some()
            || query.get_timezone().is_some()
            || !query.group_by_tags().is_empty()
        {
            trace!("Graphite target ignores having, offset, distinct, math, timezone and group-by tags");
        }

        let mut raw = GraphiteRawQuery::new(target);
        if let Some(start) = query.start_time() {
            raw.from = Some(start.timestamp().to_string());
            raw.until = Some(
                query
                    .end_time()
                    .map(|end| end.timestamp().to_string())
                    .unwrap_or_else(|| "now".to_string()),
            );
        } else if let Some(window) = query.effective_window()? {
            raw.from = Some(window.graphite());
            raw.until = Some("now".to_string());
        }

        debug!("Generated Graphite target: {}", raw.target);
        Ok(raw)
    }
}

/// Path levels for the equality conditions, in order.
///
/// A leading run of OR-joined equalities on one tag becomes a `{a,b}`
/// alternative. Returns `None` when an OR appears anywhere else, since the
/// chain then has no single-path form.
fn path_levels(conditions: &[QueryCondition]) -> Result<Option<Vec<String>>> {
    if is_conjunctive(conditions) {
        return conditions
            .iter()
            .filter(|c| c.is_equality())
            .map(|c| c.value.to_tag_string())
            .collect::<Result<Vec<_>>>()
            .map(Some);
    }

    let Some(first) = conditions.first() else {
        return Ok(Some(Vec::new()));
    };
    let run = 1 + conditions[1..]
        .iter()
        .take_while(|c| c.connective == Connective::Or)
        .count();
    let (alternatives, rest) = conditions.split_at(run);
    let expressible = alternatives
        .iter()
        .all(|c| c.is_equality() && c.field == first.field)
        && rest.iter().all(|c| c.connective == Connective::And);
    if !expressible {
        return Ok(None);
    }

    let values = alternatives
        .iter()
        .map(|c| c.value.to_tag_string())
        .collect::<Result<Vec<_>>>()?;
    let mut levels = vec![format!("{{{}}}", values.join(","))];
    for condition in rest.iter().filter(|c| c.is_equality()) {
        levels.push(condition.value.to_tag_string()?);
    }
    Ok(Some(levels))
}

fn aggregate(
    series: &str,
    aggregation: &Aggregation,
    interval: Option<&Interval>,
    default_field: &str,
) -> Result<String> {
    let (consolidated, bucket_function) = match aggregation.function {
        AggregateFunction::Avg => (format!("averageSeries({series})"), "avg"),
        AggregateFunction::Max => (format!("maxSeries({series})"), "max"),
        AggregateFunction::Min => (format!("minSeries({series})"), "min"),
        AggregateFunction::Sum => (format!("sumSeries({series})"), "sum"),
        AggregateFunction::Count => (format!("countSeries({series})"), "count"),
        AggregateFunction::Stddev => (format!("stddevSeries({series})"), "stddev"),
        AggregateFunction::Percentile(_) => {
            let rank = aggregation.function.percentile_rank()?.unwrap_or_default();
            (
                format!("percentileOfSeries({series}, {})", format_number(rank)),
                "avg",
            )
        }
    };

    let bucketed = match interval {
        Some(interval) => summarize(&consolidated, interval, bucket_function),
        None => consolidated,
    };

    Ok(format!(
        "alias({bucketed}, {})",
        quote(&aggregation.output_name(default_field))
    ))
}

fn summarize(series: &str, interval: &Interval, function: &str) -> String {
    format!(
        "summarize({series}, {}, {})",
        quote(&interval.graphite_word()),
        quote(function)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn target(builder: &GraphiteQueryBuilder, query: Query) -> String {
        builder.build(&query).unwrap().target
    }

    #[test]
    fn test_default_wildcard() {
        let builder = GraphiteQueryBuilder::new();
        assert_eq!(target(&builder, Query::new("cpu")), "cpu.*");
        let raw = builder.build(&Query::new("cpu")).unwrap();
        assert_eq!(raw.query_string(), "target=cpu.*&format=json");
    }

    #[test]
    fn test_prefix_and_equality_path() {
        let builder = GraphiteQueryBuilder::new().with_prefix("stats");
        let query = Query::new("cpu")
            .filter("region", Operator::Eq, "eu")
            .filter("host", Operator::Eq, "web1")
            .select(["idle"]);
        assert_eq!(target(&builder, query), "stats.cpu.eu.web1.idle");
    }

    #[test]
    fn test_or_joined_equalities_become_alternatives() {
        let builder = GraphiteQueryBuilder::new();
        let query = Query::new("cpu")
            .filter("host", Operator::Eq, "a")
            .or_filter("host", Operator::Eq, "b");
        assert_eq!(target(&builder, query), "cpu.{a,b}");

        let query = Query::new("cpu")
            .filter("host", Operator::Eq, "a")
            .or_filter("host", Operator::Eq, "b")
            .filter("core", Operator::Eq, "0")
            .filter("mode", Operator::Regex, "user|system");
        assert_eq!(
            target(&builder, query),
            "grep(cpu.{a,b}.0, \"user|system\")"
        );
    }

    #[test]
    fn test_inexpressible_or_selects_everything() {
        let builder = GraphiteQueryBuilder::new();
        let mixed_tags = Query::new("cpu")
            .filter("host", Operator::Eq, "a")
            .or_filter("region", Operator::Eq, "eu");
        assert_eq!(target(&builder, mixed_tags), "cpu.*");

        // (region = eu AND host = a) OR host = b
        let trailing_or = Query::new("cpu")
            .filter("region", Operator::Eq, "eu")
            .filter("host", Operator::Eq, "a")
            .or_filter("host", Operator::Eq, "b");
        assert_eq!(target(&builder, trailing_or), "cpu.*");

        let regex_or = Query::new("cpu")
            .filter("host", Operator::Regex, "web.*")
            .or_filter("host", Operator::Eq, "db1");
        assert_eq!(target(&builder, regex_or), "cpu.*");
    }

    #[test]
    fn test_multiple_fields_grouped() {
        let builder = GraphiteQueryBuilder::new();
        let query = Query::new("cpu").select(["user", "system"]);
        assert_eq!(
            target(&builder, query),
            "group(\"cpu.*.user\", \"cpu.*.system\")"
        );
    }

    #[test]
    fn test_aggregation_composition_order() {
        let builder = GraphiteQueryBuilder::new();
        let query = Query::new("cpu")
            .filter("host", Operator::Eq, "server1")
            .group_by_time("5m")
            .aggregate(Aggregation::new(AggregateFunction::Avg).alias("mean_cpu"));
        assert_eq!(
            target(&builder, query),
            "alias(summarize(averageSeries(cpu.server1), \"5minute\", \"avg\"), \"mean_cpu\")"
        );
    }

    #[test]
    fn test_multiple_aggregations_grouped() {
        let builder = GraphiteQueryBuilder::new();
        let query = Query::new("cpu").max("value").percentile("value", 95.0);
        assert_eq!(
            target(&builder, query),
            "group(alias(maxSeries(cpu.*), \"max_value\"),alias(percentileOfSeries(cpu.*, 95), \"percentile_value\"))"
        );
    }

    #[test]
    fn test_regex_fill_order_limit() {
        let builder = GraphiteQueryBuilder::new();
        let query = Query::new("cpu")
            .filter("host", Operator::Regex, "web.*")
            .fill(FillPolicy::Value(0.0))
            .order_by("value", SortDirection::Desc)
            .order_by("host", SortDirection::Asc)
            .limit(3);
        assert_eq!(
            target(&builder, query),
            "limit(sortByMinima(sortByMaxima(transformNull(grep(cpu.*, \"web.*\"), 0))), 3)"
        );
    }

    #[test]
    fn test_unsupported_clauses_are_ignored() {
        let builder = GraphiteQueryBuilder::new();
        let query = Query::new("cpu")
            .filter("load", Operator::Between, vec![1, 2])
            .filter("dc", Operator::NotIn, vec!["x"])
            .having("avg", Operator::Gt, 1)
            .offset(4)
            .distinct(["host"])
            .timezone("UTC");
        assert_eq!(target(&builder, query), "cpu.*");
    }

    #[test]
    fn test_time_parameters() {
        let builder = GraphiteQueryBuilder::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let raw = builder.build(&Query::new("cpu").time_range(t0, t1)).unwrap();
        assert_eq!(raw.from.as_deref(), Some("1704067200"));
        assert_eq!(raw.until.as_deref(), Some("1704070800"));

        let raw = builder.build(&Query::new("cpu").latest("-30m")).unwrap();
        assert_eq!(raw.from.as_deref(), Some("-30min"));
        assert_eq!(raw.until.as_deref(), Some("now"));
    }
}

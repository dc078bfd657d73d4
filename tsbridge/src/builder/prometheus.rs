//! PromQL lowering.
//!
//! PromQL selects label sets and applies vector algebra, so row-oriented
//! clauses (ordering, offset, distinct, having, fill) have no effect here.

use tracing::{debug, instrument, trace};

use super::{format_number, quote, QueryBuilder};
use crate::error::Result;
use crate::model::{is_conjunctive, Operator, QueryCondition};
use crate::query::{AggregateFunction, FillPolicy, PrometheusRawQuery, Query};

/// Builds PromQL expressions with range metadata.
#[derive(Debug, Clone, Default)]
pub struct PrometheusQueryBuilder;

impl PrometheusQueryBuilder {
    pub fn new() -> Self {
        Self
    }

    /// `measurement{label="value",...}`, or the bare measurement.
    pub fn selector(&self, query: &Query) -> Result<String> {
        let mut matchers = Vec::new();
        for condition in query.conditions() {
            if let Some(matcher) = label_matcher(condition)? {
                matchers.push(matcher);
            }
        }

        if matchers.is_empty() {
            Ok(query.measurement().to_string())
        } else {
            Ok(format!("{}{{{}}}", query.measurement(), matchers.join(",")))
        }
    }

    fn aggregate(&self, query: &Query, selector: String) -> Result<String> {
        let Some(aggregation) = query.aggregations().first() else {
            return Ok(selector);
        };
        if query.aggregations().len() > 1 {
            debug!(
                dropped = query.aggregations().len() - 1,
                "PromQL lowers a single aggregation, ignoring the rest"
            );
        }

        let tags = query.group_by_tags();
        let grouping = (!tags.is_empty()).then(|| format!(" by ({})", tags.join(",")));

        if let Some(rank) = aggregation.function.percentile_rank()? {
            let args = format!("{}, {selector}", format_number(rank / 100.0));
            return Ok(match grouping {
                Some(by) => format!("quantile{by} ({args})"),
                None => format!("quantile({args})"),
            });
        }

        let function = match aggregation.function {
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Count => "count",
            AggregateFunction::Stddev => "stddev",
            AggregateFunction::Percentile(_) => "quantile",
        };

        if let Some(by) = grouping {
            return Ok(format!("{function}{by} ({selector})"));
        }
        // Approximation: a bare time bucket becomes the rate of the aggregate.
        if let Some(interval) = query.interval()? {
            return Ok(format!("rate({function}({selector})[{interval}])"));
        }
        Ok(format!("{function}({selector})"))
    }
}

impl QueryBuilder for PrometheusQueryBuilder {
    type Raw = PrometheusRawQuery;

    #[instrument(skip(self, query), fields(measurement = %query.measurement()))]
    fn build(&self, query: &Query) -> Result<PrometheusRawQuery> {
        query.validate()?;

        if !is_conjunctive(query.conditions()) {
            debug!("label matchers are always conjunctive, treating OR as AND");
        }

        let selector = self.selector(query)?;
        let mut expr = self.aggregate(query, selector)?;

        if let Some(math) = query.math_expression() {
            expr = format!("({expr}) {}", math.expression);
        }

        if !query.order().is_empty()
            || query.get_offset().is_some()
            || query.distinct_fields().is_some()
            || query.having_clause().is_some()
            || query.fill_policy() != FillPolicy::None
        {
            trace!("ordering, offset, distinct, having and fill have no PromQL form");
        }

        let mut raw = PrometheusRawQuery::new(expr);
        raw.start = query.start_time();
        raw.end = query.end_time();
        if raw.start.is_none() {
            raw.relative = query.effective_window()?.map(|w| w.flux());
        }
        raw.step = query.interval()?.map(|i| i.as_secs());
        raw.limit = query.get_limit();

        debug!("Generated PromQL query: {}", raw.query_string());
        Ok(raw)
    }
}

fn label_matcher(condition: &QueryCondition) -> Result<Option<String>> {
    let label = &condition.field;
    let matcher = match condition.operator {
        Operator::Eq => format!("{label}={}", quote(&condition.value.to_tag_string()?)),
        Operator::NotEq => format!("{label}!={}", quote(&condition.value.to_tag_string()?)),
        Operator::Regex => format!("{label}=~{}", quote(&condition.value.to_tag_string()?)),
        Operator::In => format!("{label}=~{}", quote(&alternation(condition)?)),
        Operator::NotIn => format!("{label}!~{}", quote(&alternation(condition)?)),
        Operator::Between | Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            trace!(%condition, "no label matcher for range comparison, dropping");
            return Ok(None);
        }
    };
    Ok(Some(matcher))
}

/// `^(a|b)$` over the escaped members.
fn alternation(condition: &QueryCondition) -> Result<String> {
    let members = condition
        .value
        .members()
        .iter()
        .map(|m| m.to_tag_string().map(|s| regex::escape(&s)))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("^({})$", members.join("|")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn build(query: Query) -> PrometheusRawQuery {
        PrometheusQueryBuilder::new().build(&query).unwrap()
    }

    #[test]
    fn test_bare_selector() {
        let raw = build(Query::new("up"));
        assert_eq!(raw.query_string(), "up");
        assert!(!raw.is_range());
    }

    #[test]
    fn test_matchers() {
        let raw = build(
            Query::new("http_requests")
                .filter("job", Operator::Eq, "api")
                .filter("code", Operator::In, vec!["500", "503"])
                .filter("env", Operator::NotIn, vec!["dev"])
                .filter("path", Operator::Regex, "/v1/.*")
                .filter("cached", Operator::Eq, true)
                .filter("zone", Operator::NotEq, Option::<String>::None)
                .filter("latency", Operator::Between, vec![1, 2]),
        );
        assert_eq!(
            raw.expr,
            "http_requests{job=\"api\",code=~\"^(500|503)$\",env!~\"^(dev)$\",path=~\"/v1/.*\",cached=\"1\",zone!=\"\"}"
        );
    }

    #[test]
    fn test_aggregation_forms() {
        let raw = build(Query::new("cpu").group_by(["host", "dc"]).sum("value"));
        assert_eq!(raw.expr, "sum by (host,dc) (cpu)");

        let raw = build(Query::new("cpu").group_by_time("5m").avg("value"));
        assert_eq!(raw.expr, "rate(avg(cpu)[5m])");
        assert_eq!(raw.step, Some(300));

        let raw = build(Query::new("cpu").max("value").min("value"));
        assert_eq!(raw.expr, "max(cpu)");

        let raw = build(Query::new("latency").percentile("value", 95.0));
        assert_eq!(raw.expr, "quantile(0.95, latency)");
    }

    #[test]
    fn test_math_and_limit() {
        let raw = build(
            Query::new("mem")
                .filter("host", Operator::Eq, "a")
                .math("/ 1024", "mem_kb")
                .limit(5)
                .latest("-1h"),
        );
        assert_eq!(
            raw.query_string(),
            "(mem{host=\"a\"}) / 1024 # relative time: -1h # limit: 5"
        );
    }

    #[test]
    fn test_time_range_comment() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let raw = build(
            Query::new("cpu_usage")
                .filter("host", Operator::Eq, "server1")
                .time_range(t0, t1)
                .latest("-5m"),
        );
        assert_eq!(
            raw.query_string(),
            "cpu_usage{host=\"server1\"} # time range: 2024-01-01T00:00:00Z to 2024-01-01T01:00:00Z"
        );
        assert_eq!(raw.relative, None);
    }

    #[test]
    fn test_label_values_are_escaped() {
        let raw = build(Query::new("m").filter("path", Operator::Eq, "C:\\tmp\"x"));
        assert_eq!(raw.expr, "m{path=\"C:\\\\tmp\\\"x\"}");
    }
}

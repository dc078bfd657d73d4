//! Backend-agnostic query description and its native lowered forms.
//!
//! A [`Query`] is built with a fluent API and handed to a driver, which lowers
//! it through the backend's query builder (see [`crate::builder`]) into a
//! [`RawQuery`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{Result, TsdbError};
use crate::model::{Operator, QueryCondition, Value};

pub mod raw;
pub mod time;

pub use raw::{
    GraphiteRawQuery, InfluxRawQuery, PrometheusRawQuery, RawQuery, RrdRawQuery, RrdToken,
};
pub use time::{format_iso, Interval, RelativeWindow, TimeUnit};

/// Field selector meaning "every field".
pub const ALL_FIELDS: &str = "*";

/// Field used when nothing more specific was selected.
pub const DEFAULT_FIELD: &str = "value";

/// Aggregation function of an [`Aggregation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFunction {
    Avg,
    Min,
    Max,
    Sum,
    Count,
    Stddev,
    /// Percentile with its rank in `0..=100`.
    Percentile(f64),
}

impl AggregateFunction {
    /// Short name used for default aliases (`avg_value`).
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Count => "count",
            AggregateFunction::Stddev => "stddev",
            AggregateFunction::Percentile(_) => "percentile",
        }
    }

    /// Returns the percentile rank after checking it is usable.
    ///
    /// # Errors
    ///
    /// Fails for ranks that are not finite or fall outside `0..=100`.
    pub fn percentile_rank(&self) -> Result<Option<f64>> {
        match self {
            AggregateFunction::Percentile(rank) => {
                if !rank.is_finite() || *rank < 0.0 || *rank > 100.0 {
                    return Err(TsdbError::configuration(format!(
                        "percentile rank must be a number within 0..=100, got {rank}"
                    )));
                }
                Ok(Some(*rank))
            }
            _ => Ok(None),
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = TsdbError;

    /// Parses `avg`/`mean`, `min`, `max`, `sum`, `count`, `stddev` and `p95`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "avg" | "mean" | "average" => Ok(AggregateFunction::Avg),
            "min" => Ok(AggregateFunction::Min),
            "max" => Ok(AggregateFunction::Max),
            "sum" => Ok(AggregateFunction::Sum),
            "count" => Ok(AggregateFunction::Count),
            "stddev" => Ok(AggregateFunction::Stddev),
            other => other
                .strip_prefix('p')
                .and_then(|rank| rank.parse::<f64>().ok())
                .map(AggregateFunction::Percentile)
                .ok_or_else(|| {
                    TsdbError::configuration(format!("unknown aggregation function '{s}'"))
                }),
        }
    }
}

/// One aggregation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub function: AggregateFunction,
    /// Source field; the query's default field when absent.
    pub field: Option<String>,
    pub alias: Option<String>,
}

impl Aggregation {
    pub fn new(function: AggregateFunction) -> Self {
        Self {
            function,
            field: None,
            alias: None,
        }
    }

    /// Sets the source field.
    pub fn on(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Sets the output name.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Source field, falling back to `default`.
    pub fn field_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.field.as_deref().unwrap_or(default)
    }

    /// Output name: the alias, or `<function>_<field>`.
    pub fn output_name(&self, default_field: &str) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => format!("{}_{}", self.function.name(), self.field_or(default_field)),
        }
    }
}

/// How empty time buckets are filled.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FillPolicy {
    #[default]
    None,
    Null,
    Previous,
    Value(f64),
}

/// Direction of an order-by entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => f.write_str("ASC"),
            SortDirection::Desc => f.write_str("DESC"),
        }
    }
}

/// One order-by entry, kept in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Post-aggregation filter referencing an aggregation alias.
#[derive(Debug, Clone, PartialEq)]
pub struct HavingClause {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

/// Free-form arithmetic applied to the selected series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathExpression {
    pub expression: String,
    pub alias: String,
}

/// Builder for a backend-agnostic time-series query.
///
/// Setters never validate; invalid combinations are reported when a query
/// builder lowers the query.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use tsbridge::model::Operator;
/// use tsbridge::query::Query;
///
/// let query = Query::new("cpu_usage")
///     .filter("host", Operator::Eq, "server1")
///     .time_range(
///         Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
///         Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
///     )
///     .group_by_time("5m")
///     .avg("value");
/// assert_eq!(query.aggregations().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    measurement: String,
    fields: Vec<String>,
    conditions: Vec<QueryCondition>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    relative_window: Option<String>,
    group_by_tags: Vec<String>,
    group_by_interval: Option<String>,
    aggregations: Vec<Aggregation>,
    fill: FillPolicy,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    distinct_fields: Option<Vec<String>>,
    having: Option<HavingClause>,
    timezone: Option<String>,
    math: Option<MathExpression>,
}

impl Query {
    /// Creates a query selecting every field of `measurement`.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            fields: vec![ALL_FIELDS.to_string()],
            conditions: Vec::new(),
            start_time: None,
            end_time: None,
            relative_window: None,
            group_by_tags: Vec::new(),
            group_by_interval: None,
            aggregations: Vec::new(),
            fill: FillPolicy::None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct_fields: None,
            having: None,
            timezone: None,
            math: None,
        }
    }

    /// Replaces the selected fields.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Appends an AND-joined condition.
    ///
    /// ```rust
    /// use tsbridge::model::Operator;
    /// use tsbridge::query::Query;
    ///
    /// let query = Query::new("cpu")
    ///     .filter("region", Operator::In, vec!["eu", "us"])
    ///     .filter("load", Operator::Between, vec![0.5, 0.9]);
    /// assert_eq!(query.conditions().len(), 2);
    /// ```
    pub fn filter(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions
            .push(QueryCondition::new(field, operator, value));
        self
    }

    /// Appends an OR-joined condition.
    pub fn or_filter(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.conditions.push(QueryCondition::or(field, operator, value));
        self
    }

    /// Appends a prepared condition.
    pub fn condition(mut self, condition: QueryCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Restricts the query to an absolute time range.
    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    /// Restricts the query to samples at or after `start`.
    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Restricts the query to a window ending now, e.g. `"-1h"`.
    ///
    /// An absolute range set with [`Query::time_range`] takes precedence.
    pub fn latest(mut self, window: impl Into<String>) -> Self {
        self.relative_window = Some(window.into());
        self
    }

    /// Groups by the given tags.
    pub fn group_by<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Buckets samples into fixed windows, e.g. `"5m"`.
    pub fn group_by_time(mut self, interval: impl Into<String>) -> Self {
        self.group_by_interval = Some(interval.into());
        self
    }

    /// Appends an aggregation request.
    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn avg(self, field: impl Into<String>) -> Self {
        self.aggregate(Aggregation::new(AggregateFunction::Avg).on(field))
    }

    pub fn min(self, field: impl Into<String>) -> Self {
        self.aggregate(Aggregation::new(AggregateFunction::Min).on(field))
    }

    pub fn max(self, field: impl Into<String>) -> Self {
        self.aggregate(Aggregation::new(AggregateFunction::Max).on(field))
    }

    pub fn sum(self, field: impl Into<String>) -> Self {
        self.aggregate(Aggregation::new(AggregateFunction::Sum).on(field))
    }

    pub fn count(self, field: impl Into<String>) -> Self {
        self.aggregate(Aggregation::new(AggregateFunction::Count).on(field))
    }

    pub fn stddev(self, field: impl Into<String>) -> Self {
        self.aggregate(Aggregation::new(AggregateFunction::Stddev).on(field))
    }

    /// Appends a percentile aggregation; `rank` is checked at translation time.
    pub fn percentile(self, field: impl Into<String>, rank: f64) -> Self {
        self.aggregate(Aggregation::new(AggregateFunction::Percentile(rank)).on(field))
    }

    /// Sets how empty buckets are filled.
    pub fn fill(mut self, policy: FillPolicy) -> Self {
        self.fill = policy;
        self
    }

    /// Adds an order-by entry; ordering on the same field again replaces it in place.
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let field = field.into();
        match self.order_by.iter_mut().find(|o| o.field == field) {
            Some(existing) => existing.direction = direction,
            None => self.order_by.push(OrderBy { field, direction }),
        }
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Requests distinct values of the given fields.
    pub fn distinct<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distinct_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Filters aggregated rows by an aggregation alias.
    pub fn having(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.having = Some(HavingClause {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Sets the IANA timezone used to align time buckets.
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Applies a backend-native arithmetic expression to the selection.
    pub fn math(mut self, expression: impl Into<String>, alias: impl Into<String>) -> Self {
        self.math = Some(MathExpression {
            expression: expression.into(),
            alias: alias.into(),
        });
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Selected fields without the `*` wildcard, deduplicated in order.
    pub fn explicit_fields(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for field in &self.fields {
            if field != ALL_FIELDS && !seen.contains(&field.as_str()) {
                seen.push(field.as_str());
            }
        }
        seen
    }

    /// Field aggregations fall back to: the first explicit field, else `value`.
    pub fn default_field(&self) -> &str {
        self.explicit_fields()
            .first()
            .copied()
            .unwrap_or(DEFAULT_FIELD)
    }

    pub fn conditions(&self) -> &[QueryCondition] {
        &self.conditions
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn relative_window(&self) -> Option<&str> {
        self.relative_window.as_deref()
    }

    /// Parsed relative window, ignored when an absolute start is set.
    pub fn effective_window(&self) -> Result<Option<RelativeWindow>> {
        if self.start_time.is_some() {
            return Ok(None);
        }
        self.relative_window
            .as_deref()
            .map(str::parse::<RelativeWindow>)
            .transpose()
    }

    pub fn group_by_tags(&self) -> &[String] {
        &self.group_by_tags
    }

    pub fn group_by_interval(&self) -> Option<&str> {
        self.group_by_interval.as_deref()
    }

    /// Parsed group-by interval.
    pub fn interval(&self) -> Result<Option<Interval>> {
        self.group_by_interval
            .as_deref()
            .map(str::parse::<Interval>)
            .transpose()
    }

    pub fn aggregations(&self) -> &[Aggregation] {
        &self.aggregations
    }

    pub fn fill_policy(&self) -> FillPolicy {
        self.fill
    }

    pub fn order(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn get_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn get_offset(&self) -> Option<usize> {
        self.offset
    }

    pub fn distinct_fields(&self) -> Option<&[String]> {
        self.distinct_fields.as_deref()
    }

    pub fn having_clause(&self) -> Option<&HavingClause> {
        self.having.as_ref()
    }

    pub fn get_timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn math_expression(&self) -> Option<&MathExpression> {
        self.math.as_ref()
    }

    /// Validates query parameters for correctness.
    ///
    /// Every query builder calls this before lowering.
    pub fn validate(&self) -> Result<()> {
        if self.measurement.trim().is_empty() {
            return Err(TsdbError::invalid_query(
                "Measurement cannot be empty",
                format!("measurement: '{}'", self.measurement),
            ));
        }

        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start >= end {
                return Err(TsdbError::invalid_query(
                    "Invalid time range: start must be before end",
                    format!("start: {}, end: {}", format_iso(&start), format_iso(&end)),
                ));
            }
        }

        if self.limit == Some(0) {
            return Err(TsdbError::invalid_query(
                "Limit must be greater than 0",
                "limit: 0",
            ));
        }

        if self.fields.is_empty() {
            return Err(TsdbError::invalid_query(
                "At least one field must be selected",
                "fields: []",
            ));
        }

        // Surface malformed durations here rather than mid-lowering
        self.interval()?;
        if let Some(window) = &self.relative_window {
            window.parse::<RelativeWindow>()?;
        }

        for aggregation in &self.aggregations {
            aggregation.function.percentile_rank()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults() {
        let query = Query::new("cpu");
        assert_eq!(query.fields(), &["*".to_string()]);
        assert!(query.explicit_fields().is_empty());
        assert_eq!(query.default_field(), "value");
        assert_eq!(query.fill_policy(), FillPolicy::None);
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_chaining_appends_in_order() {
        let query = Query::new("cpu")
            .filter("host", Operator::Eq, "a")
            .or_filter("host", Operator::Eq, "b")
            .avg("usage")
            .max("usage")
            .order_by("time", SortDirection::Desc)
            .order_by("host", SortDirection::Asc)
            .order_by("time", SortDirection::Asc);

        assert_eq!(query.conditions().len(), 2);
        assert_eq!(query.aggregations()[1].function, AggregateFunction::Max);
        assert_eq!(query.order().len(), 2);
        assert_eq!(query.order()[0].field, "time");
        assert_eq!(query.order()[0].direction, SortDirection::Asc);
    }

    #[test]
    fn test_empty_measurement_rejected() {
        let err = Query::new("  ").validate().unwrap_err();
        assert!(matches!(err, TsdbError::InvalidQuery { .. }));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        assert!(Query::new("cpu").time_range(t1, t0).validate().is_err());
        assert!(Query::new("cpu").time_range(t0, t1).validate().is_ok());
    }

    #[test]
    fn test_invalid_percentile_fails_validation() {
        assert!(Query::new("cpu").percentile("v", 120.0).validate().is_err());
        assert!(Query::new("cpu").percentile("v", f64::NAN).validate().is_err());
        assert!(Query::new("cpu").percentile("v", 95.0).validate().is_ok());
    }

    #[test]
    fn test_bad_durations_fail_validation() {
        assert!(Query::new("cpu").group_by_time("soon").validate().is_err());
        assert!(Query::new("cpu").latest("yesterday").validate().is_err());
        assert!(Query::new("cpu").limit(0).validate().is_err());
    }

    #[test]
    fn test_absolute_range_beats_relative_window() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = Query::new("cpu").latest("-1h").since(t0);
        assert_eq!(query.effective_window().unwrap(), None);

        let query = Query::new("cpu").latest("-1h");
        assert_eq!(query.effective_window().unwrap().unwrap().as_secs(), 3600);
    }

    #[test]
    fn test_aggregation_output_name() {
        let agg = Aggregation::new(AggregateFunction::Avg);
        assert_eq!(agg.output_name("value"), "avg_value");
        let agg = Aggregation::new(AggregateFunction::Max).on("cpu").alias("peak");
        assert_eq!(agg.output_name("value"), "peak");
    }

    #[test]
    fn test_aggregate_function_from_str() {
        assert_eq!(
            "mean".parse::<AggregateFunction>().unwrap(),
            AggregateFunction::Avg
        );
        assert_eq!(
            "p99".parse::<AggregateFunction>().unwrap(),
            AggregateFunction::Percentile(99.0)
        );
        assert!("median".parse::<AggregateFunction>().is_err());
    }
}

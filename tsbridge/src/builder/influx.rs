//! Flux pipeline lowering for InfluxDB 2.x.

use std::collections::HashMap;

use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, instrument, trace};

use super::{format_number, quote, QueryBuilder};
use crate::error::{Result, TsdbError};
use crate::model::{is_conjunctive, Connective, Operator, QueryCondition, Value};
use crate::query::{
    format_iso, AggregateFunction, Aggregation, FillPolicy, InfluxRawQuery, Query, SortDirection,
};

const STAGE_SEPARATOR: &str = "\n  |> ";

/// Builds Flux pipelines, one literal stage per line.
#[derive(Debug, Clone)]
pub struct InfluxQueryBuilder {
    bucket: String,
    reference_time: Option<DateTime<Utc>>,
}

impl InfluxQueryBuilder {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            reference_time: None,
        }
    }

    /// Pins the instant used for the `timeShift` offset of queries without an
    /// absolute start.
    ///
    /// Relative windows end at the current time, so by default their offset
    /// is taken at build time and changes across DST transitions.
    pub fn with_reference_time(mut self, reference: DateTime<Utc>) -> Self {
        self.reference_time = Some(reference);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn range_stage(&self, query: &Query) -> Result<String> {
        if let Some(start) = query.start_time() {
            return Ok(match query.end_time() {
                Some(end) => format!(
                    "range(start: {}, stop: {})",
                    format_iso(&start),
                    format_iso(&end)
                ),
                None => format!("range(start: {})", format_iso(&start)),
            });
        }
        Ok(match query.effective_window()? {
            Some(window) => format!("range(start: {})", window.flux()),
            None => "range(start: 0)".to_string(),
        })
    }

    fn time_shift_stage(&self, query: &Query, timezone: &str) -> Result<String> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| TsdbError::configuration(format!("unknown timezone '{timezone}'")))?;
        let reference = query
            .start_time()
            .or(self.reference_time)
            .unwrap_or_else(Utc::now);
        let offset = tz
            .offset_from_utc_datetime(&reference.naive_utc())
            .fix()
            .local_minus_utc();
        Ok(format!("timeShift(duration: {offset}s)"))
    }

    fn aggregation_stages(&self, query: &Query, stages: &mut Vec<String>) -> Result<()> {
        let default_field = query.default_field();

        // Flux aggregates consume `_value`, so every additional aggregation on
        // the same field needs its own copy of the column first.
        let mut per_field: HashMap<&str, usize> = HashMap::new();
        let mut columns = Vec::with_capacity(query.aggregations().len());
        for aggregation in query.aggregations() {
            let field = aggregation.field_or(default_field);
            let seen = per_field.entry(field).or_insert(0);
            let column = if *seen == 0 {
                "_value".to_string()
            } else {
                format!("{field}_copy{seen}")
            };
            *seen += 1;
            columns.push(column);
        }

        for column in columns.iter().filter(|c| c.as_str() != "_value") {
            stages.push(format!(
                "duplicate(column: \"_value\", as: {})",
                quote(column)
            ));
        }

        for (aggregation, column) in query.aggregations().iter().zip(&columns) {
            stages.push(aggregate_call(aggregation, column)?);
            stages.push(format!(
                "rename(columns: {{{}: {}}})",
                record_key(column),
                quote(&aggregation.output_name(default_field))
            ));
        }
        Ok(())
    }
}

impl QueryBuilder for InfluxQueryBuilder {
    type Raw = InfluxRawQuery;

    #[instrument(
        skip(self, query),
        fields(measurement = %query.measurement(), bucket = %self.bucket)
    )]
    fn build(&self, query: &Query) -> Result<InfluxRawQuery> {
        query.validate()?;

        let mut stages = vec![format!("from(bucket: {})", quote(&self.bucket))];
        stages.push(self.range_stage(query)?);

        if let Some(timezone) = query.get_timezone() {
            stages.push(self.time_shift_stage(query, timezone)?);
        }

        stages.push(format!(
            "filter(fn: (r) => r._measurement == {})",
            quote(query.measurement())
        ));

        let conditions = query.conditions();
        if is_conjunctive(conditions) {
            for condition in conditions {
                stages.push(format!("filter(fn: (r) => {})", condition_expr(condition)?.0));
            }
        } else if !conditions.is_empty() {
            stages.push(format!("filter(fn: (r) => {})", fold_chain(conditions)?));
        }

        let fields = query.explicit_fields();
        if !fields.is_empty() {
            stages.push(field_filter(&fields));
        }

        if let Some(interval) = query.interval()? {
            stages.push(format!("window(every: {interval})"));
        }

        self.aggregation_stages(query, &mut stages)?;

        match query.fill_policy() {
            FillPolicy::Value(v) => stages.push(format!("fill(value: {})", float_literal(v))),
            FillPolicy::Previous => stages.push("fill(usePrevious: true)".to_string()),
            FillPolicy::Null | FillPolicy::None => {}
        }

        if let Some(having) = query.having_clause() {
            let condition =
                QueryCondition::new(having.field.clone(), having.operator, having.value.clone());
            stages.push(format!("filter(fn: (r) => {})", condition_expr(&condition)?.0));
        }

        if !query.group_by_tags().is_empty() {
            if query.group_by_interval().is_none() {
                let columns: Vec<String> =
                    query.group_by_tags().iter().map(|t| quote(t)).collect();
                stages.push(format!("group(columns: [{}])", columns.join(", ")));
            } else {
                trace!("window() already partitions per series, skipping group()");
            }
        }

        for order in query.order() {
            let column = if order.field == "time" {
                "_time"
            } else {
                order.field.as_str()
            };
            stages.push(format!(
                "sort(columns: [{}], desc: {})",
                quote(column),
                order.direction == SortDirection::Desc
            ));
        }

        match (query.get_limit(), query.get_offset()) {
            (Some(limit), Some(offset)) => {
                stages.push(format!("limit(n: {limit}, offset: {offset})"))
            }
            (Some(limit), None) => stages.push(format!("limit(n: {limit})")),
            (None, Some(offset)) => {
                return Err(TsdbError::configuration(format!(
                    "Flux cannot skip {offset} rows without a limit"
                )));
            }
            (None, None) => {}
        }

        if let Some(distinct) = query.distinct_fields() {
            let distinct: Vec<&str> = distinct.iter().map(String::as_str).collect();
            if !distinct.is_empty() {
                stages.push(field_filter(&distinct));
            }
            stages.push("distinct(column: \"_value\")".to_string());
        }

        let flux = stages.join(STAGE_SEPARATOR);
        debug!("Generated Flux query: {}", flux);
        Ok(InfluxRawQuery::flux(flux))
    }
}

fn field_filter(fields: &[&str]) -> String {
    let alternatives: Vec<String> = fields
        .iter()
        .map(|f| format!("r._field == {}", quote(f)))
        .collect();
    format!("filter(fn: (r) => {})", alternatives.join(" or "))
}

fn aggregate_call(aggregation: &Aggregation, column: &str) -> Result<String> {
    let column_arg = (column != "_value").then(|| format!("column: {}", quote(column)));
    let call = match aggregation.function {
        AggregateFunction::Avg => with_args("mean", column_arg, None),
        AggregateFunction::Min => with_args("min", column_arg, None),
        AggregateFunction::Max => with_args("max", column_arg, None),
        AggregateFunction::Sum => with_args("sum", column_arg, None),
        AggregateFunction::Count => with_args("count", column_arg, None),
        AggregateFunction::Stddev => with_args("stddev", column_arg, None),
        AggregateFunction::Percentile(_) => {
            let rank = aggregation.function.percentile_rank()?.unwrap_or_default();
            with_args(
                "quantile",
                column_arg,
                Some(format!("q: {}", format_number(rank / 100.0))),
            )
        }
    };
    Ok(call)
}

fn with_args(name: &str, column: Option<String>, extra: Option<String>) -> String {
    let args: Vec<String> = column.into_iter().chain(extra).collect();
    format!("{name}({})", args.join(", "))
}

/// Folds an AND/OR chain left to right into a single predicate.
fn fold_chain(conditions: &[QueryCondition]) -> Result<String> {
    let mut acc = String::new();
    for (i, condition) in conditions.iter().enumerate() {
        let (expr, compound) = condition_expr(condition)?;
        let operand = if compound { format!("({expr})") } else { expr };
        acc = match i {
            0 => operand,
            1 => format!("{acc} {} {operand}", connective(condition.connective)),
            _ => format!("({acc}) {} {operand}", connective(condition.connective)),
        };
    }
    Ok(acc)
}

fn connective(connective: Connective) -> &'static str {
    match connective {
        Connective::And => "and",
        Connective::Or => "or",
    }
}

/// Returns the predicate and whether it joins several comparisons.
fn condition_expr(condition: &QueryCondition) -> Result<(String, bool)> {
    let column = format!("r[{}]", quote(&condition.field));
    let value = &condition.value;
    let expr = match condition.operator {
        Operator::Eq => (format!("{column} == {}", literal(value)?), false),
        Operator::NotEq => (format!("{column} != {}", literal(value)?), false),
        Operator::Gt => (format!("{column} > {}", literal(value)?), false),
        Operator::Gte => (format!("{column} >= {}", literal(value)?), false),
        Operator::Lt => (format!("{column} < {}", literal(value)?), false),
        Operator::Lte => (format!("{column} <= {}", literal(value)?), false),
        Operator::In => membership(&column, value, "==", "or", "false")?,
        Operator::NotIn => membership(&column, value, "!=", "and", "true")?,
        Operator::Regex => {
            let pattern = value.to_tag_string()?.replace('/', "\\/");
            (format!("{column} =~ /{pattern}/"), false)
        }
        Operator::Between => {
            let (low, high) = bounds(condition)?;
            (
                format!("{column} >= {} and {column} <= {}", literal(low)?, literal(high)?),
                true,
            )
        }
    };
    Ok(expr)
}

fn membership(
    column: &str,
    value: &Value,
    op: &str,
    joiner: &str,
    empty: &str,
) -> Result<(String, bool)> {
    let parts = value
        .members()
        .iter()
        .map(|m| literal(m).map(|lit| format!("{column} {op} {lit}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(match parts.len() {
        0 => (empty.to_string(), false),
        1 => (parts.join(""), false),
        _ => (parts.join(&format!(" {joiner} ")), true),
    })
}

pub(crate) fn bounds(condition: &QueryCondition) -> Result<(&Value, &Value)> {
    match condition.value.members() {
        [low, high] => Ok((low, high)),
        _ => Err(TsdbError::configuration(format!(
            "BETWEEN on '{}' needs exactly two bounds",
            condition.field
        ))),
    }
}

fn literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("\"\"".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(float_literal(*f)),
        Value::String(s) => Ok(quote(s)),
        Value::List(_) => Err(TsdbError::configuration(format!(
            "list value {value} needs IN, NOT IN or BETWEEN"
        ))),
    }
}

fn float_literal(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn record_key(column: &str) -> String {
    let is_identifier = column
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if is_identifier {
        column.to_string()
    } else {
        quote(column)
    }
}

//! InfluxQL lowering for InfluxDB 1.x compatible endpoints.

use tracing::{debug, instrument, trace};

use super::influx::bounds;
use super::{format_number, QueryBuilder};
use crate::error::{Result, TsdbError};
use crate::model::{is_conjunctive, Connective, Operator, QueryCondition, Value};
use crate::query::{format_iso, AggregateFunction, FillPolicy, InfluxRawQuery, Query};

/// Builds `SELECT` statements.
#[derive(Debug, Clone, Default)]
pub struct InfluxQlQueryBuilder;

impl InfluxQlQueryBuilder {
    pub fn new() -> Self {
        Self
    }

    fn projection(&self, query: &Query) -> Result<String> {
        let default_field = query.default_field();
        let mut columns = Vec::new();

        if let Some(distinct) = query.distinct_fields() {
            columns.extend(
                distinct
                    .iter()
                    .map(|f| format!("DISTINCT({})", identifier(f))),
            );
        }

        for aggregation in query.aggregations() {
            let field = identifier(aggregation.field_or(default_field));
            let call = match aggregation.function {
                AggregateFunction::Avg => format!("MEAN({field})"),
                AggregateFunction::Min => format!("MIN({field})"),
                AggregateFunction::Max => format!("MAX({field})"),
                AggregateFunction::Sum => format!("SUM({field})"),
                AggregateFunction::Count => format!("COUNT({field})"),
                AggregateFunction::Stddev => format!("STDDEV({field})"),
                AggregateFunction::Percentile(_) => {
                    let rank = aggregation.function.percentile_rank()?.unwrap_or_default();
                    format!("PERCENTILE({field}, {})", format_number(rank))
                }
            };
            columns.push(format!(
                "{call} AS {}",
                identifier(&aggregation.output_name(default_field))
            ));
        }

        if columns.is_empty() {
            let fields = query.explicit_fields();
            if fields.is_empty() {
                columns.push("*".to_string());
            } else {
                columns.extend(fields.iter().map(|f| identifier(f)));
            }
        }

        if let Some(math) = query.math_expression() {
            columns.push(format!("{} AS {}", math.expression, identifier(&math.alias)));
        }

        Ok(columns.join(", "))
    }

    fn where_clause(&self, query: &Query) -> Result<Option<String>> {
        let mut predicates = Vec::new();

        let conditions = query.conditions();
        if !conditions.is_empty() {
            let chain = fold_chain(conditions)?;
            if is_conjunctive(conditions) || conditions.len() == 1 {
                predicates.push(chain);
            } else {
                predicates.push(format!("({chain})"));
            }
        }

        if let Some(start) = query.start_time() {
            predicates.push(format!("time >= '{}'", format_iso(&start)));
            if let Some(end) = query.end_time() {
                predicates.push(format!("time <= '{}'", format_iso(&end)));
            }
        } else if let Some(window) = query.effective_window()? {
            predicates.push(format!("time > now() - {}", window.0));
        }

        Ok((!predicates.is_empty()).then(|| predicates.join(" AND ")))
    }
}

impl QueryBuilder for InfluxQlQueryBuilder {
    type Raw = InfluxRawQuery;

    #[instrument(skip(self, query), fields(measurement = %query.measurement()))]
    fn build(&self, query: &Query) -> Result<InfluxRawQuery> {
        query.validate()?;

        let mut statement = format!(
            "SELECT {} FROM {}",
            self.projection(query)?,
            identifier(query.measurement())
        );

        if let Some(predicate) = self.where_clause(query)? {
            statement.push_str(&format!(" WHERE {predicate}"));
        }

        let interval = query.interval()?;
        let mut group = Vec::new();
        if let Some(interval) = interval {
            group.push(format!("time({interval})"));
        }
        group.extend(query.group_by_tags().iter().map(|t| identifier(t)));
        if !group.is_empty() {
            statement.push_str(&format!(" GROUP BY {}", group.join(",")));
        }

        if interval.is_some() {
            match query.fill_policy() {
                FillPolicy::None => {}
                FillPolicy::Null => statement.push_str(" fill(null)"),
                FillPolicy::Previous => statement.push_str(" fill(previous)"),
                FillPolicy::Value(v) => {
                    statement.push_str(&format!(" fill({})", format_number(v)))
                }
            }
        }

        if query.having_clause().is_some() {
            trace!("InfluxQL has no HAVING, dropping clause");
        }

        for order in query.order() {
            if order.field == "time" {
                statement.push_str(&format!(" ORDER BY time {}", order.direction));
                break;
            }
            trace!(field = %order.field, "InfluxQL can only order by time");
        }

        if let Some(limit) = query.get_limit() {
            statement.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.get_offset() {
            statement.push_str(&format!(" OFFSET {offset}"));
        }

        if let Some(timezone) = query.get_timezone() {
            statement.push_str(&format!(" tz('{}')", timezone.replace('\'', "\\'")));
        }

        debug!("Generated InfluxQL query: {}", statement);
        Ok(InfluxRawQuery::influxql(statement))
    }
}

/// Double-quoted InfluxQL identifier.
fn identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

fn literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("''".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::String(s) => Ok(format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))),
        Value::List(_) => Err(TsdbError::configuration(format!(
            "list value {value} needs IN, NOT IN or BETWEEN"
        ))),
    }
}

fn fold_chain(conditions: &[QueryCondition]) -> Result<String> {
    let mut acc = String::new();
    for (i, condition) in conditions.iter().enumerate() {
        let operand = predicate(condition)?;
        let joiner = match condition.connective {
            Connective::And => "AND",
            Connective::Or => "OR",
        };
        acc = match i {
            0 => operand,
            // InfluxQL binds AND tighter than OR; parenthesize to keep the
            // chain strictly left to right.
            1 => format!("{acc} {joiner} {operand}"),
            _ => format!("({acc}) {joiner} {operand}"),
        };
    }
    Ok(acc)
}

fn predicate(condition: &QueryCondition) -> Result<String> {
    let column = identifier(&condition.field);
    let value = &condition.value;
    Ok(match condition.operator {
        Operator::Eq => format!("{column} = {}", literal(value)?),
        Operator::NotEq => format!("{column} != {}", literal(value)?),
        Operator::Gt => format!("{column} > {}", literal(value)?),
        Operator::Gte => format!("{column} >= {}", literal(value)?),
        Operator::Lt => format!("{column} < {}", literal(value)?),
        Operator::Lte => format!("{column} <= {}", literal(value)?),
        Operator::Regex => format!(
            "{column} =~ /{}/",
            value.to_tag_string()?.replace('/', "\\/")
        ),
        Operator::In | Operator::NotIn => {
            let (op, joiner) = if condition.operator == Operator::In {
                ("=", " OR ")
            } else {
                ("!=", " AND ")
            };
            let parts = value
                .members()
                .iter()
                .map(|m| literal(m).map(|lit| format!("{column} {op} {lit}")))
                .collect::<Result<Vec<_>>>()?;
            match parts.len() {
                0 if condition.operator == Operator::In => "false".to_string(),
                0 => "true".to_string(),
                1 => parts.join(""),
                _ => format!("({})", parts.join(joiner)),
            }
        }
        Operator::Between => {
            let (low, high) = bounds(condition)?;
            format!(
                "({column} >= {} AND {column} <= {})",
                literal(low)?,
                literal(high)?
            )
        }
    })
}

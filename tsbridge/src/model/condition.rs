//! Filter predicates shared by every query builder and the RRD tag search.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Value;
use crate::error::TsdbError;

/// Comparison operator of a [`QueryCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Regex,
    Between,
}

impl Operator {
    /// The canonical textual form (`=`, `!=`, `IN`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Regex => "REGEX",
            Operator::Between => "BETWEEN",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = TsdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::NotEq),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "IN" => Ok(Operator::In),
            "NOT IN" => Ok(Operator::NotIn),
            "REGEX" | "=~" => Ok(Operator::Regex),
            "BETWEEN" => Ok(Operator::Between),
            _ => Err(TsdbError::configuration(format!("unknown operator '{s}'"))),
        }
    }
}

/// How a condition joins the conditions before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connective {
    #[default]
    And,
    Or,
}

impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connective::And => f.write_str("AND"),
            Connective::Or => f.write_str("OR"),
        }
    }
}

/// One filter predicate.
///
/// Conditions form a left-to-right chain: `connective` joins this condition
/// with the accumulated result of everything before it. The connective of the
/// first condition in a list is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCondition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    #[serde(default)]
    pub connective: Connective,
}

impl QueryCondition {
    /// Creates an AND-joined condition.
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            connective: Connective::And,
        }
    }

    /// Creates an OR-joined condition.
    pub fn or(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::new(field, operator, value).with_connective(Connective::Or)
    }

    /// Replaces the connective.
    pub fn with_connective(mut self, connective: Connective) -> Self {
        self.connective = connective;
        self
    }

    /// True for `field = value` conditions.
    pub fn is_equality(&self) -> bool {
        self.operator == Operator::Eq
    }
}

impl fmt::Display for QueryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// Returns true when no condition in the chain is OR-joined.
pub fn is_conjunctive(conditions: &[QueryCondition]) -> bool {
    conditions
        .iter()
        .skip(1)
        .all(|c| c.connective == Connective::And)
}

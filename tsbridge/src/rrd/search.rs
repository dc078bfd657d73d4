//! Evaluation of tag conditions against decoded RRD tag sets.

use regex::Regex;
use tracing::trace;

use super::codec::TagMap;
use crate::error::{Result, TsdbError};
use crate::model::{Connective, Operator, QueryCondition};

/// Tag predicates are ordinary query conditions.
pub type TagCondition = QueryCondition;

/// Left-to-right evaluator for AND/OR condition chains.
///
/// The first condition seeds the accumulator and every following condition
/// is folded in with its own connective: `a OR b AND c` means
/// `(a OR b) AND c`, not the usual precedence. Every condition is evaluated,
/// so an invalid one fails the search even when the result is already known.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagSearch;

impl TagSearch {
    /// Returns whether `tags` satisfies the chain; an empty chain matches.
    ///
    /// # Errors
    ///
    /// Fails on ordering operators (`>`, `>=`, `<`, `<=`), invalid regular
    /// expressions and malformed `BETWEEN` bounds.
    pub fn matches(tags: &TagMap, conditions: &[TagCondition]) -> Result<bool> {
        let mut acc: Option<bool> = None;
        for condition in conditions {
            let result = Self::evaluate(tags, condition)?;
            acc = Some(match (acc, condition.connective) {
                (None, _) => result,
                (Some(prev), Connective::And) => prev && result,
                (Some(prev), Connective::Or) => prev || result,
            });
        }
        Ok(acc.unwrap_or(true))
    }

    /// Evaluates one condition. A missing tag reads as the empty string.
    pub fn evaluate(tags: &TagMap, condition: &TagCondition) -> Result<bool> {
        let actual = tags.get(&condition.field).map(String::as_str).unwrap_or("");
        let result = match condition.operator {
            Operator::Eq => actual == condition.value.to_tag_string()?,
            Operator::NotEq => actual != condition.value.to_tag_string()?,
            Operator::In => Self::is_member(actual, condition)?,
            Operator::NotIn => !Self::is_member(actual, condition)?,
            Operator::Regex => {
                let pattern = condition.value.to_tag_string()?;
                let regex = Regex::new(&pattern).map_err(|e| {
                    TsdbError::tag_resolution(format!("invalid pattern '{pattern}': {e}"))
                })?;
                regex.is_match(actual)
            }
            Operator::Between => {
                let (low, high) = match condition.value.members() {
                    [low, high] => (low.as_f64(), high.as_f64()),
                    _ => (None, None),
                };
                let (Some(low), Some(high)) = (low, high) else {
                    return Err(TsdbError::tag_resolution(format!(
                        "BETWEEN on '{}' needs two numeric bounds, got {}",
                        condition.field, condition.value
                    )));
                };
                actual
                    .trim()
                    .parse::<f64>()
                    .map(|v| low <= v && v <= high)
                    .unwrap_or(false)
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                return Err(TsdbError::tag_resolution(format!(
                    "unsupported operator '{}' for tag '{}'",
                    condition.operator, condition.field
                )));
            }
        };
        trace!(%condition, actual, result, "evaluated tag condition");
        Ok(result)
    }

    fn is_member(actual: &str, condition: &TagCondition) -> Result<bool> {
        for member in condition.value.members() {
            if member.to_tag_string()? == actual {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

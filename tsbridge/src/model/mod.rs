//! Backend-agnostic data model: values, conditions, points and results.

mod condition;
mod point;
mod result;
mod value;

pub use condition::{is_conjunctive, Connective, Operator, QueryCondition};
pub use point::{DataPoint, FieldValue};
pub use result::{QueryResult, Series, TimeValue};
pub use value::Value;

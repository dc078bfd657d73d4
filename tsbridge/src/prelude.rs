//! Prelude for commonly used types and traits in tsbridge.

pub use crate::builder::{
    AnyQueryBuilder, GraphiteQueryBuilder, InfluxQlQueryBuilder, InfluxQueryBuilder,
    PrometheusQueryBuilder, QueryBuilder, RrdQueryBuilder,
};
pub use crate::driver::{AggregateDriver, Driver, DriverConfig, DriverRegistry};
pub use crate::error::{ErrorContext, Result, TsdbError};
pub use crate::logging::LogConfig;
pub use crate::model::{
    Connective, DataPoint, FieldValue, Operator, QueryCondition, QueryResult, Value,
};
pub use crate::query::{AggregateFunction, FillPolicy, Query, RawQuery, SortDirection};
pub use crate::rrd::{FileNameStrategy, FolderStrategy, NoTagsStrategy, TagSearch, TagStrategy};
pub use crate::transport::Transport;

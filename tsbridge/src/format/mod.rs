//! Write-path encoders turning [`DataPoint`](crate::model::DataPoint)s into
//! each backend's ingestion format.

pub mod graphite;
pub mod line_protocol;
pub mod prometheus;
pub mod rrd;

pub use graphite::GraphiteEncoder;
pub use line_protocol::LineProtocolEncoder;
pub use prometheus::ExpositionEncoder;
pub use rrd::RrdEncoder;

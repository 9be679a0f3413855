mod batch;
mod macros;
mod metric;
pub mod tags;

pub use batch::{MetricBatch, Scope};
pub use metric::{IntoF64, Kind, Metric, MetricValue};
pub use tags::{Key, Tags, Value};

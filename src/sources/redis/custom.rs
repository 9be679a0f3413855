use event::Metric;
use event::tags::Tags;

use super::builder::MetricBuilder;
use super::client::Value;
use super::config::{CustomCommand, CustomMetricType};

/// Numeric value of a custom command reply. Arrays need `value_extractor`
/// to pick one element, anything else yields `None`.
fn coerce(reply: &Value, extractor: Option<usize>) -> Option<f64> {
    let value = match reply {
        Value::Array(items) => items.get(extractor?)?,
        other => other,
    };

    value.as_f64().filter(|v| v.is_finite())
}

/// Record the reply of a custom command, replies which are not numbers are
/// dropped silently.
pub fn record_custom(mb: &mut MetricBuilder, def: &CustomCommand, reply: &Value) {
    let Some(value) = coerce(reply, def.value_extractor) else {
        debug!(
            message = "custom command reply is not a number",
            name = %def.name,
            command = %def.command,
        );
        return;
    };

    let tags = Tags::from(def.labels.clone());
    let metric = match def.typ {
        CustomMetricType::Counter => {
            Metric::sum_with_tags(def.name.as_str(), def.description.as_str(), value, tags)
        }
        CustomMetricType::Gauge | CustomMetricType::Histogram => {
            Metric::gauge_with_tags(def.name.as_str(), def.description.as_str(), value, tags)
        }
    };

    mb.record(metric);
}

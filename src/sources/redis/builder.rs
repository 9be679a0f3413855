use chrono::{DateTime, Utc};
use event::tags::Tags;
use event::{IntoF64, Metric};

/// Collects the metrics of one cycle, every point gets the same timestamp.
///
/// Whether a metric is a gauge or a sum is decided by the method used to
/// record it, call sites always use the same one for a given name.
pub struct MetricBuilder {
    timestamp: DateTime<Utc>,
    metrics: Vec<Metric>,
}

impl MetricBuilder {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            metrics: Vec::with_capacity(128),
        }
    }

    pub fn gauge(
        &mut self,
        name: &'static str,
        desc: &'static str,
        unit: &'static str,
        value: impl IntoF64,
        tags: Tags,
    ) {
        let metric = Metric::gauge_with_tags(name, desc, value, tags);
        self.push(metric, unit);
    }

    pub fn sum(
        &mut self,
        name: &'static str,
        desc: &'static str,
        unit: &'static str,
        value: impl IntoF64,
        tags: Tags,
    ) {
        let metric = Metric::sum_with_tags(name, desc, value, tags);
        self.push(metric, unit);
    }

    /// For metrics named at runtime, i.e. custom commands.
    pub fn record(&mut self, metric: Metric) {
        self.push(metric, "");
    }

    fn push(&mut self, metric: Metric, unit: &'static str) {
        let mut metric = metric.with_timestamp(Some(self.timestamp));
        if !unit.is_empty() {
            metric = metric.with_unit(unit);
        }

        self.metrics.push(metric);
    }

    pub fn finish(self) -> Vec<Metric> {
        self.metrics
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// The single value of `name`, panics unless exactly one point exists.
    #[cfg(test)]
    pub fn value(&self, name: &str) -> f64 {
        let found = self
            .metrics
            .iter()
            .filter(|m| m.name == name)
            .collect::<Vec<_>>();
        assert_eq!(found.len(), 1, "want exactly one {name}, got {found:?}");

        found[0].value.as_f64()
    }

    #[cfg(test)]
    pub fn find(&self, name: &str) -> Vec<&Metric> {
        self.metrics.iter().filter(|m| m.name == name).collect()
    }

    #[cfg(test)]
    pub fn names(&self) -> std::collections::BTreeSet<&str> {
        self.metrics.iter().map(|m| m.name.as_str()).collect()
    }
}

/// Integers of `INFO` and friends, unparsable text counts as zero.
#[inline]
pub fn parse_int(value: &str) -> i64 {
    let value = value.trim();
    match value.parse::<i64>() {
        Ok(v) => v,
        Err(_) => value.parse::<f64>().map(|v| v as i64).unwrap_or(0),
    }
}

/// Like `parse_int`, status words like `ok` or `up` map to 1 and 0.
#[inline]
pub fn parse_float(value: &str) -> f64 {
    match value.trim() {
        "ok" | "up" | "true" | "yes" => 1.0,
        "err" | "fail" | "down" | "false" | "no" => 0.0,
        value => value.parse::<f64>().unwrap_or(0.0),
    }
}

/// `hits / (hits + misses)`, zero without any lookups.
#[inline]
pub fn hit_ratio(hits: f64, misses: f64) -> f64 {
    let total = hits + misses;
    if total == 0.0 { 0.0 } else { hits / total }
}

/// Split `k1=v1,k2=v2` into pairs, entries without `=` are ignored.
pub fn split_pairs(value: &str) -> impl Iterator<Item = (&str, &str)> {
    value.split(',').filter_map(|kv| kv.split_once('='))
}

#[cfg(test)]
mod tests {
    use event::{Kind, tags};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn leniency() {
        assert_eq!(parse_int("42"), 42);
        assert_eq!(parse_int(" 7\r"), 7);
        assert_eq!(parse_int("1.9"), 1);
        assert_eq!(parse_int(""), 0);
        assert_eq!(parse_int("abc"), 0);

        assert_eq!(parse_float("1.5"), 1.5);
        assert_eq!(parse_float("up"), 1.0);
        assert_eq!(parse_float("down"), 0.0);
        assert_eq!(parse_float(""), 0.0);
    }

    #[test]
    fn ratio() {
        assert_eq!(hit_ratio(0.0, 0.0), 0.0);
        assert_eq!(hit_ratio(10.0, 0.0), 1.0);
        assert_eq!(hit_ratio(3.0, 1.0), 0.75);
    }

    #[test]
    fn pairs() {
        let got = split_pairs("ip=10.0.0.2,port=6380,garbage,lag=0").collect::<Vec<_>>();
        assert_eq!(got, vec![("ip", "10.0.0.2"), ("port", "6380"), ("lag", "0")]);
    }

    #[test]
    fn record() {
        let now = Utc::now();
        let mut mb = MetricBuilder::new(now);
        mb.gauge("redis.memory.used", "", "By", 1024, Tags::default());
        mb.sum("redis.commands.calls", "", "", 3, tags!("command" => "get"));

        let metrics = mb.finish();
        assert_eq!(metrics[0].kind(), Kind::Gauge);
        assert_eq!(metrics[0].unit, Some("By"));
        assert_eq!(metrics[0].timestamp, Some(now));
        assert_eq!(metrics[1].kind(), Kind::Sum);
        assert_eq!(metrics[1].unit, None);
        assert_eq!(metrics[1].tag_value("command").as_deref(), Some("get"));
    }
}

use std::fmt::{Display, Formatter, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tags::Tags;

/// The kind of a metric, fixed per metric name.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Gauge,
    /// Cumulative and monotonic, downstream computes rates from it
    Sum,
}

#[derive(Clone, Debug, Deserialize, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValue {
    Gauge(f64),
    Sum(f64),
}

impl MetricValue {
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Gauge(v) | MetricValue::Sum(v) => *v,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,

    #[serde(skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    pub value: MetricValue,
}

pub trait IntoF64 {
    fn into_f64(self) -> f64;
}

macro_rules! impl_intof64 {
    ($($typ:ident),+) => {
        $(
            impl IntoF64 for $typ {
                #[inline]
                fn into_f64(self) -> f64 {
                    self as f64
                }
            }
        )+
    };
}

impl_intof64!(usize, i64, u64, f64, u32, i32, f32);

impl IntoF64 for bool {
    #[inline]
    fn into_f64(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }
}

impl IntoF64 for std::time::Duration {
    #[inline]
    fn into_f64(self) -> f64 {
        self.as_secs_f64()
    }
}

impl Metric {
    #[inline]
    pub fn gauge<N, D, V>(name: N, desc: D, value: V) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: IntoF64,
    {
        Self::gauge_with_tags(name, desc, value, Tags::default())
    }

    #[inline]
    pub fn gauge_with_tags<N, D, V>(name: N, desc: D, value: V, tags: Tags) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: IntoF64,
    {
        Self {
            name: name.into(),
            description: desc.into(),
            unit: None,
            tags,
            timestamp: None,
            value: MetricValue::Gauge(value.into_f64()),
        }
    }

    #[inline]
    pub fn sum<N, D, V>(name: N, desc: D, value: V) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: IntoF64,
    {
        Self::sum_with_tags(name, desc, value, Tags::default())
    }

    #[inline]
    pub fn sum_with_tags<N, D, V>(name: N, desc: D, value: V, tags: Tags) -> Metric
    where
        N: Into<String>,
        D: Into<String>,
        V: IntoF64,
    {
        Self {
            name: name.into(),
            description: desc.into(),
            unit: None,
            tags,
            timestamp: None,
            value: MetricValue::Sum(value.into_f64()),
        }
    }

    #[must_use]
    #[inline]
    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    #[must_use]
    #[inline]
    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[inline]
    pub fn kind(&self) -> Kind {
        match self.value {
            MetricValue::Gauge(_) => Kind::Gauge,
            MetricValue::Sum(_) => Kind::Sum,
        }
    }

    #[inline]
    pub fn tag_value(&self, key: &str) -> Option<String> {
        self.tags.get(key).map(ToString::to_string)
    }
}

impl Display for Metric {
    /// Display a metric using something like Prometheus's text format
    ///
    /// ```text
    /// TIMESTAMP NAME{TAGS} KIND VALUE
    /// ```
    ///
    /// KIND is `=` for gauges and `+` for monotonic sums.
    ///
    /// example:
    /// ```text
    /// 2025-08-12T20:23:37.248661343Z redis.commands.calls{command="get"} + 6371
    /// ```
    fn fmt(&self, fmt: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(timestamp) = &self.timestamp {
            write!(fmt, "{timestamp:?} ")?;
        }

        fmt.write_str(&self.name)?;

        if !self.tags.is_empty() {
            fmt.write_char('{')?;

            for (n, (k, v)) in self.tags.iter().enumerate() {
                if n != 0 {
                    fmt.write_char(',')?;
                }
                write!(fmt, "{k}=\"{v}\"")?;
            }

            fmt.write_char('}')?;
        }

        match self.value {
            MetricValue::Gauge(v) => write!(fmt, " = {v}"),
            MetricValue::Sum(v) => write!(fmt, " + {v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tags;

    #[test]
    fn display() {
        let metric = Metric::sum_with_tags(
            "redis.commands.calls",
            "Total number of calls",
            6371,
            tags!("command" => "get", "role" => "master"),
        );
        assert_eq!(
            metric.to_string(),
            r#"redis.commands.calls{command="get",role="master"} + 6371"#
        );

        let metric = Metric::gauge("redis.memory.fragmentation_ratio", "", 1.5);
        assert_eq!(metric.to_string(), "redis.memory.fragmentation_ratio = 1.5");
    }

    #[test]
    fn kind_follows_constructor() {
        assert_eq!(Metric::gauge("a", "", 1).kind(), Kind::Gauge);
        assert_eq!(Metric::sum("b", "", 1u64).kind(), Kind::Sum);
        assert_eq!(Metric::gauge("c", "", true).value, MetricValue::Gauge(1.0));
    }
}

use event::tags;

use super::builder::MetricBuilder;
use super::client::Value;

const PERCENTILES: [(f64, &str); 3] = [(0.5, "50"), (0.99, "99"), (0.999, "99.9")];

#[derive(Debug, PartialEq)]
struct LatencyEvent<'a> {
    name: &'a str,
    timestamp: i64,
    latest: i64,
    max: i64,
}

// https://redis.io/docs/latest/commands/latency-latest/
//
// 1) 1) "command"
//    2) (integer) 1405067976
//    3) (integer) 251
//    4) (integer) 1001
fn parse_latest(reply: &Value) -> Vec<LatencyEvent<'_>> {
    let Some(entries) = reply.as_array() else {
        return vec![];
    };

    entries
        .iter()
        .filter_map(|entry| {
            let fields = entry.as_array()?;

            Some(LatencyEvent {
                name: fields.first()?.as_str()?,
                timestamp: fields.get(1).and_then(Value::as_i64).unwrap_or_default(),
                latest: fields.get(2).and_then(Value::as_i64).unwrap_or_default(),
                max: fields.get(3).and_then(Value::as_i64).unwrap_or_default(),
            })
        })
        .collect()
}

/// Record the reply of `LATENCY LATEST`.
pub fn record_latest(mb: &mut MetricBuilder, reply: &Value) {
    for event in parse_latest(reply) {
        let tags = tags!("event" => event.name);

        mb.gauge(
            "redis.latency.latest",
            "Latency of the latest spike of the event",
            "ms",
            event.latest,
            tags.clone(),
        );
        mb.gauge(
            "redis.latency.max",
            "All time maximum latency of the event",
            "ms",
            event.max,
            tags.clone(),
        );
        mb.gauge(
            "redis.latency.timestamp",
            "Unix timestamp of the latest spike of the event",
            "s",
            event.timestamp,
            tags,
        );
    }
}

/// Cumulative latency buckets of one command.
#[derive(Debug, PartialEq)]
struct Histogram<'a> {
    command: &'a str,
    calls: u64,
    /// `(upper bound in usec, cumulative count)`, ascending
    buckets: Vec<(u64, u64)>,
}

impl Histogram<'_> {
    /// Upper bound of the first bucket holding `q` of all calls.
    fn percentile(&self, q: f64) -> Option<u64> {
        if self.calls == 0 {
            return None;
        }

        let rank = (q * self.calls as f64).ceil() as u64;
        self.buckets
            .iter()
            .find(|(_, count)| *count >= rank)
            .or(self.buckets.last())
            .map(|(bound, _)| *bound)
    }
}

// https://redis.io/docs/latest/commands/latency-histogram/
//
// 1) "set"
// 2) 1) "calls"
//    2) (integer) 100000
//    3) "histogram_usec"
//    4) 1) (integer) 1
//       2) (integer) 99583
//       3) (integer) 2
//       4) (integer) 99852
fn parse_histogram(reply: &Value) -> Vec<Histogram<'_>> {
    let Some(arr) = reply.as_array() else {
        return vec![];
    };

    arr.chunks_exact(2)
        .filter_map(|pair| {
            let command = pair[0].as_str()?;
            let details = pair[1].as_array()?;

            let mut calls = 0;
            let mut buckets = vec![];
            for kv in details.chunks_exact(2) {
                match kv[0].as_str()? {
                    "calls" => calls = kv[1].as_i64().unwrap_or_default().max(0) as u64,
                    "histogram_usec" => {
                        let Some(items) = kv[1].as_array() else {
                            continue;
                        };

                        buckets = items
                            .chunks_exact(2)
                            .filter_map(|b| {
                                let bound = b[0].as_i64()?;
                                let count = b[1].as_i64()?;
                                Some((bound.max(0) as u64, count.max(0) as u64))
                            })
                            .collect();
                        buckets.sort_unstable();
                    }
                    _ => {}
                }
            }

            Some(Histogram {
                command,
                calls,
                buckets,
            })
        })
        .collect()
}

/// Record the reply of `LATENCY HISTOGRAM`, Redis 7 and later.
pub fn record_histogram(mb: &mut MetricBuilder, reply: &Value) {
    for histogram in parse_histogram(reply) {
        for (q, label) in PERCENTILES {
            let Some(value) = histogram.percentile(q) else {
                continue;
            };

            mb.gauge(
                "redis.latency.percentile",
                "Latency percentile of the command",
                "us",
                value,
                tags!("event" => histogram.command, "percentile" => label),
            );
        }
    }
}

use std::collections::BTreeMap;

use event::tags;
use event::tags::Tags;

use super::builder::MetricBuilder;
use super::client::Value;

/// One entry of `SLOWLOG GET`.
#[derive(Clone, Debug, PartialEq)]
pub struct SlowLogEntry {
    pub id: i64,
    pub timestamp: i64,
    /// Execution time in microseconds
    pub duration: i64,
    pub args: Vec<String>,
    /// Since Redis 4.0
    pub client_addr: Option<String>,
    pub client_name: Option<String>,
}

impl SlowLogEntry {
    /// Upper cased command name, `UNKNOWN` for an entry without arguments.
    pub fn command(&self) -> String {
        self.args
            .first()
            .map_or_else(|| "UNKNOWN".to_string(), |cmd| cmd.to_uppercase())
    }
}

// 1) 1) (integer) 14
//    2) (integer) 1309448221
//    3) (integer) 15
//    4) 1) "ping"
//    5) "127.0.0.1:58217"
//    6) "worker-1"
pub fn parse_slowlog(reply: &Value) -> Vec<SlowLogEntry> {
    let Some(entries) = reply.as_array() else {
        return vec![];
    };

    entries
        .iter()
        .filter_map(|entry| {
            let fields = entry.as_array()?;
            let text = |index: usize| fields.get(index).and_then(Value::as_str).map(String::from);

            Some(SlowLogEntry {
                id: fields.first()?.as_i64()?,
                timestamp: fields.get(1).and_then(Value::as_i64).unwrap_or_default(),
                duration: fields.get(2).and_then(Value::as_i64).unwrap_or_default(),
                args: fields
                    .get(3)
                    .and_then(Value::as_array)
                    .map(|args| args.iter().filter_map(Value::as_str).map(String::from).collect())
                    .unwrap_or_default(),
                client_addr: text(4),
                client_name: text(5),
            })
        })
        .collect()
}

/// Keep the entries newer than `last`, the highest id seen by an earlier
/// scrape, and return them with the new mark. The mark never goes down,
/// even when the log was reset.
pub fn filter_new_entries(
    entries: Vec<SlowLogEntry>,
    last: Option<i64>,
) -> (Vec<SlowLogEntry>, Option<i64>) {
    let top = entries.iter().map(|entry| entry.id).max();
    let mark = match (last, top) {
        (Some(last), Some(top)) => Some(last.max(top)),
        (last, top) => last.or(top),
    };

    let entries = match last {
        Some(last) => entries.into_iter().filter(|entry| entry.id > last).collect(),
        None => entries,
    };

    (entries, mark)
}

pub fn record_slowlog(mb: &mut MetricBuilder, entries: &[SlowLogEntry], include_commands: bool) {
    mb.gauge(
        "redis.slowlog.count",
        "Number of slow log entries recorded",
        "{entry}",
        entries.len(),
        Tags::default(),
    );

    let max = entries.iter().map(|entry| entry.duration).max().unwrap_or(0);
    mb.gauge(
        "redis.slowlog.max_duration",
        "Longest execution time of the recorded slow log entries",
        "us",
        max,
        Tags::default(),
    );

    if !include_commands {
        return;
    }

    let mut by_command = BTreeMap::<String, usize>::new();
    for entry in entries {
        *by_command.entry(entry.command()).or_default() += 1;
    }

    for (command, count) in by_command {
        mb.gauge(
            "redis.slowlog.by_command",
            "Number of slow log entries of the command",
            "{entry}",
            count,
            tags!("command" => command),
        );
    }
}

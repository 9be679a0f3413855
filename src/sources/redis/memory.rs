use event::tags;
use event::tags::Tags;

use super::client::Value;
use super::builder::MetricBuilder;

const FIELDS: [(&str, &str, &str); 8] = [
    (
        "peak.allocated",
        "redis.memory.peak_allocated",
        "Peak memory consumed by Redis",
    ),
    (
        "total.allocated",
        "redis.memory.total_allocated",
        "Total number of bytes allocated by Redis using its allocator",
    ),
    (
        "startup.allocated",
        "redis.memory.startup_allocated",
        "Initial amount of memory consumed by Redis at startup",
    ),
    (
        "replication.backlog",
        "redis.memory.replication_backlog",
        "Size of the replication backlog",
    ),
    (
        "clients.normal",
        "redis.memory.clients_normal",
        "Total size of all regular client overheads",
    ),
    (
        "clients.slaves",
        "redis.memory.clients_slaves",
        "Total size of all replica overheads",
    ),
    (
        "aof.buffer",
        "redis.memory.aof_buffer",
        "Total size of the current and rewrite AOF buffers",
    ),
    (
        "dataset.bytes",
        "redis.memory.dataset",
        "Size in bytes of the dataset",
    ),
];

/// Record the reply of `MEMORY STATS`, a flat list of pairs where `db.N`
/// holds a nested list of pairs.
///
/// ```text
///  1) "peak.allocated"
///  2) (integer) 1048576
///  ...
/// 21) "db.0"
/// 22) 1) "overhead.hashtable.main"
///     2) (integer) 72
///     3) "overhead.hashtable.expires"
///     4) (integer) 0
/// ```
pub fn record_memory_stats(mb: &mut MetricBuilder, stats: &[(String, Value)]) {
    for (key, name, desc) in FIELDS {
        let Some((_, value)) = stats.iter().find(|(k, _)| k == key) else {
            continue;
        };

        mb.gauge(
            name,
            desc,
            "By",
            value.as_f64().unwrap_or_default(),
            Tags::default(),
        );
    }

    for (key, value) in stats {
        let Some(index) = key.strip_prefix("db.") else {
            continue;
        };
        let Some(fields) = value.as_array() else {
            continue;
        };

        let mut main = 0.0;
        let mut expires = 0.0;
        for pair in fields.chunks_exact(2) {
            match pair[0].as_str() {
                Some("overhead.hashtable.main") => main = pair[1].as_f64().unwrap_or_default(),
                Some("overhead.hashtable.expires") => {
                    expires = pair[1].as_f64().unwrap_or_default()
                }
                _ => {}
            }
        }

        let tags = tags!("database" => format!("db{index}"));
        mb.gauge(
            "redis.memory.db.overhead",
            "Overhead of the main dictionary of the database",
            "By",
            main,
            tags.clone(),
        );
        mb.gauge(
            "redis.memory.db.expires_overhead",
            "Overhead of the expires dictionary of the database",
            "By",
            expires,
            tags,
        );
    }
}

use std::collections::BTreeMap;
use std::sync::LazyLock;

use event::Kind;
use event::tags::Tags;
use event::tags;

use super::builder::{MetricBuilder, hit_ratio, parse_float, parse_int, split_pairs};

/// `section -> key -> value`, section names are lower case.
pub type Info = BTreeMap<String, BTreeMap<String, String>>;

/// Parse the reply of `INFO`.
///
/// ```text
/// # Server
/// redis_version:7.2.4
/// uptime_in_seconds:86400
///
/// # Clients
/// connected_clients:12
/// ```
///
/// Fields before the first header land in the section `""`, lines without
/// a `:` are ignored.
pub fn parse_info(text: &str) -> Info {
    let mut info = Info::new();
    let mut section = String::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('#') {
            section = name.trim().to_lowercase();
            info.entry(section.clone()).or_default();
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        info.entry(section.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    info
}

struct Field {
    key: &'static str,
    /// Name used by older servers
    alt: Option<&'static str>,
    name: &'static str,
    desc: &'static str,
    unit: &'static str,
    kind: Kind,
}

const fn gauge(key: &'static str, name: &'static str, desc: &'static str, unit: &'static str) -> Field {
    Field {
        key,
        alt: None,
        name,
        desc,
        unit,
        kind: Kind::Gauge,
    }
}

const fn sum(key: &'static str, name: &'static str, desc: &'static str, unit: &'static str) -> Field {
    Field {
        key,
        alt: None,
        name,
        desc,
        unit,
        kind: Kind::Sum,
    }
}

const fn or(field: Field, alt: &'static str) -> Field {
    Field {
        alt: Some(alt),
        ..field
    }
}

/// Plain `key -> metric` mappings of each section, the fields with extra
/// rules are handled in `record_server_info`.
static SECTION_FIELDS: LazyLock<BTreeMap<&'static str, Vec<Field>>> = LazyLock::new(|| {
    let mut m = BTreeMap::new();

    m.insert(
        "server",
        vec![gauge(
            "uptime_in_seconds",
            "redis.server.uptime",
            "Number of seconds since Redis server start",
            "s",
        )],
    );

    m.insert(
        "clients",
        vec![
            gauge(
                "connected_clients",
                "redis.clients.connected",
                "Number of client connections (excluding connections from replicas)",
                "{client}",
            ),
            gauge(
                "blocked_clients",
                "redis.clients.blocked",
                "Number of clients pending on a blocking call",
                "{client}",
            ),
            or(
                gauge(
                    "client_recent_max_input_buffer",
                    "redis.clients.max_input_buffer",
                    "Biggest input buffer among current client connections",
                    "By",
                ),
                "client_biggest_input_buf",
            ),
            or(
                gauge(
                    "client_recent_max_output_buffer",
                    "redis.clients.max_output_buffer",
                    "Longest output list among current client connections",
                    "By",
                ),
                "client_longest_output_list",
            ),
        ],
    );

    m.insert(
        "memory",
        vec![
            gauge(
                "used_memory",
                "redis.memory.used",
                "Total number of bytes allocated by Redis using its allocator",
                "By",
            ),
            gauge(
                "used_memory_rss",
                "redis.memory.rss",
                "Number of bytes that Redis allocated as seen by the operating system",
                "By",
            ),
            gauge(
                "used_memory_peak",
                "redis.memory.peak",
                "Peak memory consumed by Redis",
                "By",
            ),
            or(
                gauge(
                    "used_memory_lua",
                    "redis.memory.lua",
                    "Number of bytes used by the Lua engine",
                    "By",
                ),
                "used_memory_vm_eval",
            ),
            gauge(
                "mem_fragmentation_ratio",
                "redis.memory.fragmentation_ratio",
                "Ratio between used_memory_rss and used_memory",
                "1",
            ),
        ],
    );

    m.insert(
        "persistence",
        vec![
            gauge(
                "rdb_changes_since_last_save",
                "redis.persistence.rdb.changes_since_last_save",
                "Number of changes since the last dump",
                "{change}",
            ),
            gauge(
                "rdb_last_save_time",
                "redis.persistence.rdb.last_save_time",
                "Epoch-based timestamp of the last successful RDB save",
                "s",
            ),
            gauge(
                "rdb_bgsave_in_progress",
                "redis.persistence.rdb.saves_in_progress",
                "Flag indicating a RDB save is on-going",
                "1",
            ),
            gauge(
                "aof_enabled",
                "redis.persistence.aof.enabled",
                "Flag indicating AOF logging is activated",
                "1",
            ),
        ],
    );

    m.insert(
        "stats",
        vec![
            sum(
                "total_connections_received",
                "redis.connections.received",
                "Total number of connections accepted by the server",
                "{connection}",
            ),
            sum(
                "total_commands_processed",
                "redis.commands.processed",
                "Total number of commands processed by the server",
                "{command}",
            ),
            gauge(
                "instantaneous_ops_per_sec",
                "redis.commands.per_second",
                "Number of commands processed per second",
                "{ops}/s",
            ),
            sum(
                "total_net_input_bytes",
                "redis.net.input.bytes",
                "The total number of bytes read from the network",
                "By",
            ),
            sum(
                "total_net_output_bytes",
                "redis.net.output.bytes",
                "The total number of bytes written to the network",
                "By",
            ),
            sum(
                "rejected_connections",
                "redis.rejected_connections",
                "Number of connections rejected because of maxclients limit",
                "{connection}",
            ),
            sum(
                "expired_keys",
                "redis.expired_keys",
                "Total number of key expiration events",
                "{event}",
            ),
            sum(
                "evicted_keys",
                "redis.evicted_keys",
                "Number of evicted keys due to maxmemory limit",
                "{key}",
            ),
            sum(
                "keyspace_hits",
                "redis.keyspace.hits",
                "Number of successful lookup of keys in the main dictionary",
                "{hit}",
            ),
            sum(
                "keyspace_misses",
                "redis.keyspace.misses",
                "Number of failed lookup of keys in the main dictionary",
                "{miss}",
            ),
        ],
    );

    m.insert(
        "cpu",
        vec![
            sum(
                "used_cpu_sys",
                "redis.cpu.system",
                "System CPU consumed by the Redis server",
                "s",
            ),
            sum(
                "used_cpu_user",
                "redis.cpu.user",
                "User CPU consumed by the Redis server",
                "s",
            ),
            sum(
                "used_cpu_sys_children",
                "redis.cpu.children.system",
                "System CPU consumed by the background processes",
                "s",
            ),
            sum(
                "used_cpu_user_children",
                "redis.cpu.children.user",
                "User CPU consumed by the background processes",
                "s",
            ),
        ],
    );

    m.insert(
        "cluster",
        vec![gauge(
            "cluster_enabled",
            "redis.cluster.enabled",
            "Indicate Redis cluster is enabled",
            "1",
        )],
    );

    m
});

fn record_fields(mb: &mut MetricBuilder, fields: &BTreeMap<String, String>, table: &[Field]) {
    for field in table {
        let value = fields
            .get(field.key)
            .or_else(|| field.alt.and_then(|alt| fields.get(alt)));
        let Some(value) = value else {
            continue;
        };

        let value = parse_float(value);
        match field.kind {
            Kind::Gauge => mb.gauge(field.name, field.desc, field.unit, value, Tags::default()),
            Kind::Sum => mb.sum(field.name, field.desc, field.unit, value, Tags::default()),
        }
    }
}

/// Record the enabled `sections` of an `INFO` reply. Sections missing from
/// the reply yield nothing.
pub fn record_server_info(
    mb: &mut MetricBuilder,
    info: &Info,
    sections: &[&str],
    keyspace_stats: bool,
) {
    for section in sections {
        let Some(fields) = info.get(*section) else {
            continue;
        };

        if let Some(table) = SECTION_FIELDS.get(section) {
            record_fields(mb, fields, table);
        }

        match *section {
            "memory" => {
                let max = fields.get("maxmemory").map_or(0, |v| parse_int(v));
                if max > 0 {
                    mb.gauge(
                        "redis.memory.max",
                        "The value of the maxmemory configuration directive",
                        "By",
                        max,
                        Tags::default(),
                    );
                }
            }
            "persistence" => record_aof(mb, fields),
            "stats" => {
                let hits = fields.get("keyspace_hits").map_or(0.0, |v| parse_float(v));
                let misses = fields.get("keyspace_misses").map_or(0.0, |v| parse_float(v));

                mb.gauge(
                    "redis.keyspace.hits.ratio",
                    "Ratio of successful key lookups",
                    "1",
                    hit_ratio(hits, misses),
                    Tags::default(),
                );
            }
            "replication" => record_replication(mb, fields),
            "keyspace" if keyspace_stats => record_keyspace(mb, fields),
            _ => {}
        }
    }
}

fn record_aof(mb: &mut MetricBuilder, fields: &BTreeMap<String, String>) {
    let enabled = fields.get("aof_enabled").map_or(0, |v| parse_int(v));
    if enabled != 1 {
        return;
    }

    for (key, name, desc, unit) in [
        (
            "aof_rewrite_in_progress",
            "redis.persistence.aof.rewrite_in_progress",
            "Flag indicating a AOF rewrite operation is on-going",
            "1",
        ),
        (
            "aof_current_size",
            "redis.persistence.aof.current_size",
            "AOF current file size",
            "By",
        ),
        (
            "aof_base_size",
            "redis.persistence.aof.base_size",
            "AOF file size on latest startup or rewrite",
            "By",
        ),
    ] {
        if let Some(value) = fields.get(key) {
            mb.gauge(name, desc, unit, parse_float(value), Tags::default());
        }
    }
}

/// A `slaveN` line of a master.
#[derive(Debug, PartialEq)]
struct Slave<'a> {
    id: &'a str,
    ip: &'a str,
    port: &'a str,
    state: &'a str,
    offset: f64,
    lag: f64,
}

/// The slave line looks like
///
/// ```text
/// slave0:ip=10.254.11.1,port=6379,state=online,offset=1751844676,lag=0
/// slave1:ip=10.254.11.2,port=6379,state=online,offset=1751844222,lag=0
/// ```
fn parse_connected_slave<'a>(key: &'a str, value: &'a str) -> Option<Slave<'a>> {
    let id = key.strip_prefix("slave")?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut slave = Slave {
        id,
        ip: "",
        port: "",
        state: "",
        offset: 0.0,
        lag: 0.0,
    };
    for (k, v) in split_pairs(value) {
        match k {
            "ip" => slave.ip = v,
            "port" => slave.port = v,
            "state" => slave.state = v,
            "offset" => slave.offset = parse_float(v),
            "lag" => slave.lag = parse_float(v),
            _ => {}
        }
    }

    Some(slave)
}

fn record_replication(mb: &mut MetricBuilder, fields: &BTreeMap<String, String>) {
    let Some(role) = fields.get("role") else {
        return;
    };

    mb.gauge(
        "redis.replication.role",
        "Role of the instance, the value is always 1",
        "1",
        1,
        tags!("role" => role.as_str()),
    );

    match role.as_str() {
        "master" => {
            if let Some(value) = fields.get("connected_slaves") {
                mb.gauge(
                    "redis.replication.connected_slaves",
                    "Number of connected replicas",
                    "{replica}",
                    parse_int(value),
                    Tags::default(),
                );
            }

            for (key, value) in fields {
                let Some(slave) = parse_connected_slave(key, value) else {
                    continue;
                };

                let tags = tags!(
                    "slave_id" => slave.id,
                    "address" => format!("{}:{}", slave.ip, slave.port)
                );

                mb.gauge(
                    "redis.replication.slave.online",
                    "Whether the replica is online",
                    "1",
                    slave.state == "online",
                    tags.clone(),
                );
                mb.gauge(
                    "redis.replication.slave.lag",
                    "Seconds since the last interaction with the replica",
                    "s",
                    slave.lag,
                    tags.clone(),
                );
                mb.gauge(
                    "redis.replication.slave.offset",
                    "Replication offset acknowledged by the replica",
                    "By",
                    slave.offset,
                    tags,
                );
            }
        }
        "slave" => {
            let host = fields.get("master_host").map_or("", String::as_str);
            let port = fields.get("master_port").map_or("", String::as_str);
            let tags = tags!("master_host" => host, "master_port" => port);

            if let Some(status) = fields.get("master_link_status") {
                mb.gauge(
                    "redis.replication.master_link_up",
                    "Whether the link to the master is up",
                    "1",
                    status == "up",
                    tags.clone(),
                );
            }

            if let Some(value) = fields.get("master_last_io_seconds_ago") {
                mb.gauge(
                    "redis.replication.master_last_io_seconds",
                    "Seconds since the last interaction with the master",
                    "s",
                    parse_int(value),
                    tags.clone(),
                );
            }

            let offset = fields.get("slave_repl_offset").map_or(0, |v| parse_int(v));
            if offset > 0 {
                mb.gauge(
                    "redis.replication.slave_offset",
                    "Replication offset of the replica",
                    "By",
                    offset,
                    tags,
                );
            }
        }
        _ => {}
    }
}

/// Per database key counts, valid example: `db0:keys=1,expires=0,avg_ttl=0`
fn record_keyspace(mb: &mut MetricBuilder, fields: &BTreeMap<String, String>) {
    for (db, value) in fields {
        let Some(index) = db.strip_prefix("db") else {
            continue;
        };
        if index.parse::<u32>().is_err() {
            continue;
        }

        let mut keys = 0;
        let mut expires = 0;
        let mut avg_ttl = 0;
        for (k, v) in split_pairs(value) {
            match k {
                "keys" => keys = parse_int(v),
                "expires" => expires = parse_int(v),
                "avg_ttl" => avg_ttl = parse_int(v),
                _ => {}
            }
        }

        let tags = tags!("database" => db.as_str());
        mb.gauge(
            "redis.keyspace.keys",
            "Number of keys in the database",
            "{key}",
            keys,
            tags.clone(),
        );
        mb.gauge(
            "redis.keyspace.expires",
            "Number of keys with an expiration",
            "{key}",
            expires,
            tags.clone(),
        );
        mb.gauge(
            "redis.keyspace.avg_ttl",
            "Average keyspace keys TTL",
            "ms",
            avg_ttl,
            tags,
        );
    }
}

#[derive(Debug, Default, PartialEq)]
struct CommandStats {
    calls: f64,
    usec: f64,
    usec_per_call: f64,
    rejected_calls: Option<f64>,
    failed_calls: Option<f64>,
}

/// ```text
/// cmdstat_get:calls=21,usec=175,usec_per_call=8.33,rejected_calls=0,failed_calls=0
/// cmdstat_config|get:calls=3,usec=60,usec_per_call=20.00
/// ```
///
/// broken up like this:
///     key   = cmdstat_get
///     value = calls=21,usec=175,usec_per_call=8.33,...
fn parse_command_stats<'a>(key: &'a str, value: &str) -> Option<(&'a str, CommandStats)> {
    let cmd = key.strip_prefix("cmdstat_")?;

    let mut stats = CommandStats::default();
    for (k, v) in split_pairs(value) {
        match k {
            "calls" => stats.calls = parse_float(v),
            "usec" => stats.usec = parse_float(v),
            "usec_per_call" => stats.usec_per_call = parse_float(v),
            "rejected_calls" => stats.rejected_calls = Some(parse_float(v)),
            "failed_calls" => stats.failed_calls = Some(parse_float(v)),
            _ => {}
        }
    }

    Some((cmd, stats))
}

/// Record the reply of `INFO commandstats`.
pub fn record_command_stats(mb: &mut MetricBuilder, info: &Info) {
    let Some(fields) = info.get("commandstats") else {
        return;
    };

    for (key, value) in fields {
        let Some((cmd, stats)) = parse_command_stats(key, value) else {
            continue;
        };

        let tags = tags!("command" => cmd);
        mb.sum(
            "redis.commands.calls",
            "Number of calls of the command",
            "{call}",
            stats.calls,
            tags.clone(),
        );
        mb.sum(
            "redis.commands.usec",
            "Total CPU time consumed by the command",
            "us",
            stats.usec,
            tags.clone(),
        );
        mb.gauge(
            "redis.commands.usec_per_call",
            "Average CPU time consumed per command execution",
            "us",
            stats.usec_per_call,
            tags.clone(),
        );

        if let Some(rejected) = stats.rejected_calls {
            mb.sum(
                "redis.commands.rejected_calls",
                "Number of rejected calls, errors prior to the command execution",
                "{call}",
                rejected,
                tags.clone(),
            );
        }
        if let Some(failed) = stats.failed_calls {
            mb.sum(
                "redis.commands.failed_calls",
                "Number of failed calls, errors within the command execution",
                "{call}",
                failed,
                tags,
            );
        }
    }
}

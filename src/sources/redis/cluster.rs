use std::collections::BTreeMap;

use event::tags;
use event::tags::Tags;

use super::builder::{MetricBuilder, parse_int};
use super::client::SlotRange;
use super::info::Info;

const CLUSTER_INFO_FIELDS: [(&str, &str, &str); 6] = [
    (
        "cluster_slots_assigned",
        "redis.cluster.slots_assigned",
        "Number of slots associated to some node",
    ),
    (
        "cluster_slots_ok",
        "redis.cluster.slots_ok",
        "Number of slots not in FAIL or PFAIL state",
    ),
    (
        "cluster_slots_pfail",
        "redis.cluster.slots_pfail",
        "Number of slots of nodes in PFAIL state",
    ),
    (
        "cluster_slots_fail",
        "redis.cluster.slots_fail",
        "Number of slots of nodes in FAIL state",
    ),
    (
        "cluster_known_nodes",
        "redis.cluster.known_nodes",
        "Number of nodes in the cluster, including handshaking ones",
    ),
    (
        "cluster_size",
        "redis.cluster.size",
        "Number of master nodes serving at least one slot",
    ),
];

/// Record the reply of `CLUSTER INFO`, which looks like the body of one
/// `INFO` section.
pub fn record_cluster_info(mb: &mut MetricBuilder, text: &str) {
    let fields = text
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .collect::<BTreeMap<_, _>>();

    if let Some(state) = fields.get("cluster_state") {
        mb.gauge(
            "redis.cluster.state",
            "State of the cluster, 1 for ok and 0 for fail",
            "1",
            *state == "ok",
            Tags::default(),
        );
    }

    for (key, name, desc) in CLUSTER_INFO_FIELDS {
        if let Some(value) = fields.get(key) {
            mb.gauge(name, desc, "1", parse_int(value), Tags::default());
        }
    }
}

#[derive(Debug, PartialEq)]
struct ClusterNode<'a> {
    addr: &'a str,
    flags: Vec<&'a str>,
    ping_sent: i64,
    pong_received: i64,
    connected: bool,
}

// <id> <ip:port@cport[,hostname]> <flags> <master> <ping-sent> <pong-recv> <config-epoch> <link-state> <slot> ...
fn parse_cluster_nodes(text: &str) -> Vec<ClusterNode<'_>> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_ascii_whitespace();
            let _id = parts.next()?;
            let addr = parts.next()?;
            let flags = parts.next()?;
            let _master = parts.next()?;
            let ping_sent = parts.next()?;
            let pong_received = parts.next()?;
            let _epoch = parts.next()?;
            let link_state = parts.next()?;

            let addr = addr.split([',', '@']).next().unwrap_or(addr);

            Some(ClusterNode {
                addr,
                flags: flags.split(',').collect(),
                ping_sent: parse_int(ping_sent),
                pong_received: parse_int(pong_received),
                connected: link_state == "connected",
            })
        })
        .collect()
}

/// Record the reply of `CLUSTER NODES`.
pub fn record_cluster_nodes(mb: &mut MetricBuilder, text: &str) {
    let nodes = parse_cluster_nodes(text);

    let mut masters = 0;
    let mut slaves = 0;
    for node in &nodes {
        if node.flags.contains(&"master") {
            masters += 1;
        } else if node.flags.contains(&"slave") {
            slaves += 1;
        }

        let tags = tags!("node" => node.addr);
        mb.gauge(
            "redis.cluster.node.connected",
            "Whether the link to the node is connected",
            "1",
            node.connected,
            tags.clone(),
        );

        // the local node reports 0 for both
        if node.ping_sent > 0 {
            mb.gauge(
                "redis.cluster.node.ping_sent",
                "Unix time in milliseconds the currently active ping was sent",
                "ms",
                node.ping_sent,
                tags.clone(),
            );
        }
        if node.pong_received > 0 {
            mb.gauge(
                "redis.cluster.node.pong_received",
                "Unix time in milliseconds the last pong was received",
                "ms",
                node.pong_received,
                tags,
            );
        }
    }

    mb.gauge(
        "redis.cluster.masters",
        "Number of master nodes",
        "{node}",
        masters,
        Tags::default(),
    );
    mb.gauge(
        "redis.cluster.slaves",
        "Number of replica nodes",
        "{node}",
        slaves,
        Tags::default(),
    );
}

/// Record how many slots every master serves.
pub fn record_slots(mb: &mut MetricBuilder, ranges: &[SlotRange]) {
    let mut counts = BTreeMap::<&str, usize>::new();
    for range in ranges {
        *counts.entry(range.master.as_str()).or_default() += range.slot_count();
    }

    for (node, count) in counts {
        mb.gauge(
            "redis.cluster.node.slots",
            "Number of slots served by the node",
            "{slot}",
            count,
            tags!("node" => node),
        );
    }
}

/// Record node scoped metrics from the `INFO` reply of one shard.
pub fn record_node_info(mb: &mut MetricBuilder, node: &str, info: &Info) {
    for (section, key, name, desc, unit) in [
        (
            "stats",
            "instantaneous_ops_per_sec",
            "redis.cluster.node.ops_per_sec",
            "Number of commands processed per second by the node",
            "{operation}/s",
        ),
        (
            "clients",
            "connected_clients",
            "redis.cluster.node.connected_clients",
            "Number of client connections of the node",
            "{client}",
        ),
        (
            "memory",
            "used_memory",
            "redis.cluster.node.used_memory",
            "Bytes allocated by the node",
            "By",
        ),
    ] {
        let Some(value) = info.get(section).and_then(|fields| fields.get(key)) else {
            continue;
        };

        mb.gauge(name, desc, unit, parse_int(value), tags!("node" => node));
    }
}

use std::collections::BTreeMap;

use event::tags;
use event::tags::Tags;

use super::builder::{MetricBuilder, parse_int};

/// One line of `CLIENT LIST`.
///
/// ```text
/// id=3 addr=127.0.0.1:50188 fd=8 name= age=10 idle=0 flags=N db=0 qbuf=26 omem=0 cmd=client|list
/// ```
pub fn parse_client_list(text: &str) -> Vec<BTreeMap<&str, &str>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split(' ')
                .filter_map(|field| field.split_once('='))
                .collect()
        })
        .collect()
}

/// Aggregate the connected clients, individual clients never become
/// attributes.
pub fn record_client_list(mb: &mut MetricBuilder, text: &str) {
    let clients = parse_client_list(text);

    let mut by_command = BTreeMap::<&str, usize>::new();
    let mut by_flag = BTreeMap::<char, usize>::new();
    let mut input = 0;
    let mut output = 0;

    for client in &clients {
        if let Some(cmd) = client.get("cmd") {
            *by_command.entry(*cmd).or_default() += 1;
        }

        // every character is one flag, N means no flags
        if let Some(flags) = client.get("flags") {
            for flag in flags.chars() {
                *by_flag.entry(flag).or_default() += 1;
            }
        }

        input += client.get("qbuf").map_or(0, |v| parse_int(v));
        output += client.get("omem").map_or(0, |v| parse_int(v));
    }

    for (command, count) in by_command {
        mb.gauge(
            "redis.clients.by_command",
            "Number of clients whose last command was the command",
            "{client}",
            count,
            tags!("command" => command),
        );
    }

    for (flag, count) in by_flag {
        mb.gauge(
            "redis.clients.by_flag",
            "Number of clients with the flag set",
            "{client}",
            count,
            tags!("flag" => flag.to_string()),
        );
    }

    mb.gauge(
        "redis.clients.total_input_buffer",
        "Sum of the query buffers of all clients",
        "By",
        input,
        Tags::default(),
    );
    mb.gauge(
        "redis.clients.total_output_buffer",
        "Sum of the output buffers of all clients",
        "By",
        output,
        Tags::default(),
    );
}

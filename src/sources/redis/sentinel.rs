use std::collections::BTreeMap;

use event::tags;
use event::tags::Tags;

use super::builder::{MetricBuilder, parse_int};
use super::client::{ConnectOptions, Connection, Error};

type Fields = BTreeMap<String, String>;

#[inline]
fn is_down(fields: &Fields) -> bool {
    fields
        .get("flags")
        .is_some_and(|flags| flags.split(',').any(|f| f == "s_down" || f == "o_down"))
}

#[inline]
fn int(fields: &Fields, key: &str) -> i64 {
    fields.get(key).map_or(0, |v| parse_int(v))
}

fn address(fields: &Fields) -> String {
    match (fields.get("ip"), fields.get("port")) {
        (Some(ip), Some(port)) => format!("{ip}:{port}"),
        _ => fields.get("name").cloned().unwrap_or_default(),
    }
}

/// Replies of one sentinel, fetched before anything is recorded so a
/// failing command leaves no partial output.
#[derive(Debug, Default)]
pub struct SentinelState {
    pub masters: Vec<Fields>,
    pub master: Fields,
    pub replicas: Vec<Fields>,
}

/// Query the first sentinel on a dedicated connection, which is dropped
/// before returning.
pub async fn fetch(
    sentinel: &str,
    master_name: &str,
    opts: &ConnectOptions,
) -> Result<SentinelState, Error> {
    let mut conn = Connection::connect(sentinel, opts).await?;

    let masters = conn.request::<Vec<Fields>>(&["SENTINEL", "MASTERS"]).await?;
    let master = conn
        .request::<Fields>(&["SENTINEL", "MASTER", master_name])
        .await?;
    let replicas = conn
        .request::<Vec<Fields>>(&["SENTINEL", "REPLICAS", master_name])
        .await?;

    Ok(SentinelState {
        masters,
        master,
        replicas,
    })
}

pub fn record_sentinel(mb: &mut MetricBuilder, master_name: &str, state: &SentinelState) {
    mb.gauge(
        "redis.sentinel.masters",
        "Number of masters monitored by the sentinel",
        "{master}",
        state.masters.len(),
        Tags::default(),
    );

    for fields in &state.masters {
        let Some(name) = fields.get("name") else {
            continue;
        };
        let tags = tags!("master" => name);

        mb.gauge(
            "redis.sentinel.master.down",
            "Whether the master is subjectively or objectively down",
            "1",
            is_down(fields),
            tags.clone(),
        );
        // other sentinels plus the one asked
        mb.gauge(
            "redis.sentinel.master.sentinels",
            "Number of sentinels monitoring the master",
            "{sentinel}",
            int(fields, "num-other-sentinels") + 1,
            tags.clone(),
        );
        mb.gauge(
            "redis.sentinel.master.slaves",
            "Number of replicas of the master",
            "{replica}",
            int(fields, "num-slaves"),
            tags,
        );
    }

    if !state.master.is_empty() {
        let tags = tags!("master" => master_name, "address" => address(&state.master));
        let link_up = state
            .master
            .get("flags")
            .is_some_and(|flags| !flags.split(',').any(|f| f == "disconnected"));

        mb.gauge(
            "redis.sentinel.master.quorum",
            "Sentinels needed to agree the master is down",
            "{sentinel}",
            int(&state.master, "quorum"),
            tags.clone(),
        );
        mb.gauge(
            "redis.sentinel.master.link_up",
            "Whether the sentinel is connected to the master",
            "1",
            link_up,
            tags.clone(),
        );
        mb.gauge(
            "redis.sentinel.master.last_ping",
            "Milliseconds since the last valid reply to a PING",
            "ms",
            int(&state.master, "last-ok-ping-reply"),
            tags,
        );
    }

    for fields in &state.replicas {
        let addr = address(fields);
        let replica = fields.get("name").cloned().unwrap_or_else(|| addr.clone());
        let tags = tags!(
            "master" => master_name,
            "replica" => replica,
            "address" => addr,
        );

        mb.gauge(
            "redis.sentinel.replica.down",
            "Whether the replica is subjectively or objectively down",
            "1",
            is_down(fields),
            tags.clone(),
        );
        mb.gauge(
            "redis.sentinel.replica.link_up",
            "Whether the replication link of the replica is up",
            "1",
            fields.get("master-link-status").is_some_and(|s| s == "ok"),
            tags.clone(),
        );
        mb.gauge(
            "redis.sentinel.replica.lag",
            "Seconds the replication link has been down",
            "s",
            int(fields, "master-link-down-time") as f64 / 1000.0,
            tags.clone(),
        );
        mb.gauge(
            "redis.sentinel.replica.offset",
            "Replication offset of the replica",
            "By",
            int(fields, "slave-repl-offset"),
            tags,
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{MockServer, array, bulk, error};

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn encode(pairs: &[(&str, &str)]) -> String {
        array(
            pairs
                .iter()
                .flat_map(|(k, v)| [bulk(k), bulk(v)])
                .collect(),
        )
    }

    const MYMASTER: [(&str, &str); 7] = [
        ("name", "mymaster"),
        ("ip", "10.0.0.1"),
        ("port", "6379"),
        ("flags", "master"),
        ("last-ok-ping-reply", "420"),
        ("num-slaves", "1"),
        ("num-other-sentinels", "2"),
    ];

    #[test]
    fn record() {
        let mut master = fields(&MYMASTER);
        master.insert("quorum".to_string(), "2".to_string());

        let state = SentinelState {
            masters: vec![
                fields(&MYMASTER),
                fields(&[("name", "cache"), ("flags", "master,s_down,disconnected")]),
            ],
            master,
            replicas: vec![fields(&[
                ("name", "10.0.0.2:6380"),
                ("ip", "10.0.0.2"),
                ("port", "6380"),
                ("flags", "slave"),
                ("master-link-down-time", "2500"),
                ("master-link-status", "ok"),
                ("slave-repl-offset", "1000"),
            ])],
        };

        let mut mb = MetricBuilder::new(Utc::now());
        record_sentinel(&mut mb, "mymaster", &state);

        assert_eq!(mb.value("redis.sentinel.masters"), 2.0);
        let down = mb
            .find("redis.sentinel.master.down")
            .iter()
            .map(|m| (m.tag_value("master").unwrap_or_default(), m.value.as_f64()))
            .collect::<Vec<_>>();
        assert_eq!(
            down,
            vec![("mymaster".to_string(), 0.0), ("cache".to_string(), 1.0)]
        );
        assert_eq!(mb.find("redis.sentinel.master.sentinels")[0].value.as_f64(), 3.0);
        assert_eq!(mb.find("redis.sentinel.master.sentinels")[1].value.as_f64(), 1.0);

        assert_eq!(mb.value("redis.sentinel.master.quorum"), 2.0);
        assert_eq!(mb.value("redis.sentinel.master.link_up"), 1.0);
        assert_eq!(mb.value("redis.sentinel.master.last_ping"), 420.0);
        assert_eq!(
            mb.find("redis.sentinel.master.quorum")[0]
                .tag_value("address")
                .as_deref(),
            Some("10.0.0.1:6379")
        );

        assert_eq!(mb.value("redis.sentinel.replica.down"), 0.0);
        assert_eq!(mb.value("redis.sentinel.replica.link_up"), 1.0);
        assert_eq!(mb.value("redis.sentinel.replica.lag"), 2.5);
        assert_eq!(mb.value("redis.sentinel.replica.offset"), 1000.0);
        let replica = &mb.find("redis.sentinel.replica.offset")[0];
        assert_eq!(replica.tag_value("replica").as_deref(), Some("10.0.0.2:6380"));
        assert_eq!(replica.tag_value("master").as_deref(), Some("mymaster"));
    }

    #[tokio::test]
    async fn fetch_from_sentinel() {
        let sentinel = MockServer::start(|cmds| match cmds[1].to_uppercase().as_str() {
            "MASTERS" => array(vec![encode(&MYMASTER)]),
            "MASTER" => encode(&MYMASTER),
            "REPLICAS" => array(vec![]),
            _ => error("ERR unknown subcommand"),
        })
        .await;

        let state = fetch(&sentinel.addr(), "mymaster", &ConnectOptions::default())
            .await
            .unwrap();
        assert_eq!(state.masters.len(), 1);
        assert_eq!(state.master["ip"], "10.0.0.1");
        assert!(state.replicas.is_empty());

        assert_eq!(
            sentinel.commands(),
            vec![
                vec!["SENTINEL", "MASTERS"],
                vec!["SENTINEL", "MASTER", "mymaster"],
                vec!["SENTINEL", "REPLICAS", "mymaster"],
            ]
        );
    }

    #[tokio::test]
    async fn unknown_master() {
        let sentinel = MockServer::start(|cmds| match cmds[1].as_str() {
            "MASTERS" => array(vec![]),
            _ => error("ERR No such master with that name"),
        })
        .await;

        let err = fetch(&sentinel.addr(), "mymaster", &ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Server(_)), "{err:?}");
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::seq::IndexedRandom;

use super::Error;
use super::connection::ConnectOptions;
use super::frame::{FromFrame, Value};
use super::pool::{Pool, PoolOptions};

const SLOTS: u16 = 16384;

/// Commands without a key, they can be served by any node.
const KEYLESS: &[&str] = &[
    "ACL", "ASKING", "AUTH", "CLIENT", "CLUSTER", "COMMAND", "CONFIG", "DBSIZE", "FUNCTION",
    "INFO", "LASTSAVE", "LATENCY", "MEMORY", "MODULE", "PING", "READONLY", "ROLE", "SCRIPT",
    "SLOWLOG", "TIME",
];

#[derive(Clone, Copy, Debug)]
pub struct ClusterOptions {
    pub max_redirects: usize,
    /// Replicas may serve commands
    pub read_only: bool,
    pub route_by_latency: bool,
    pub route_randomly: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            max_redirects: 3,
            read_only: false,
            route_by_latency: true,
            route_randomly: false,
        }
    }
}

/// One entry of `CLUSTER SLOTS`.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub master: String,
    pub replicas: Vec<String>,
}

impl SlotRange {
    #[inline]
    pub fn slot_count(&self) -> usize {
        usize::from(self.end.saturating_sub(self.start)) + 1
    }

    #[inline]
    fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot <= self.end
    }
}

/// Parse the reply of `CLUSTER SLOTS`. Nodes announcing an empty host are
/// reachable on `fallback_host`, the host of the node we asked. Malformed
/// entries are skipped.
pub fn parse_cluster_slots(reply: &Value, fallback_host: &str) -> Vec<SlotRange> {
    let Some(entries) = reply.as_array() else {
        return vec![];
    };

    let node_addr = |node: &Value| -> Option<String> {
        let fields = node.as_array()?;
        let host = fields.first()?.as_str()?;
        let port = fields.get(1)?.as_i64()?;
        let host = if host.is_empty() || host == "?" {
            fallback_host
        } else {
            host
        };

        if host.contains(':') {
            Some(format!("[{host}]:{port}"))
        } else {
            Some(format!("{host}:{port}"))
        }
    };

    entries
        .iter()
        .filter_map(|entry| {
            let fields = entry.as_array()?;
            let start = u16::try_from(fields.first()?.as_i64()?).ok()?;
            let end = u16::try_from(fields.get(1)?.as_i64()?).ok()?;
            let master = node_addr(fields.get(2)?)?;
            let replicas = fields[3..].iter().filter_map(node_addr).collect();

            Some(SlotRange {
                start,
                end,
                master,
                replicas,
            })
        })
        .collect()
}

/// CRC16-CCITT (XModem), the checksum Redis Cluster hashes keys with.
fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;

    for &b in data {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }

    crc
}

/// Hash slot of a key, honouring `{hash tags}`.
pub fn key_slot(key: &str) -> u16 {
    let key = key.as_bytes();
    let hashed = match key.iter().position(|&b| b == b'{') {
        Some(open) => match key[open + 1..].iter().position(|&b| b == b'}') {
            Some(len) if len > 0 => &key[open + 1..open + 1 + len],
            _ => key,
        },
        None => key,
    };

    crc16(hashed) % SLOTS
}

fn key_of<'a>(cmds: &[&'a str]) -> Option<&'a str> {
    let cmd = cmds.first()?;
    if KEYLESS.iter().any(|name| name.eq_ignore_ascii_case(cmd)) {
        return None;
    }

    cmds.get(1).copied()
}

/// Client of a Redis Cluster, discovered from a list of seed nodes.
pub struct ClusterClient {
    seeds: Vec<String>,
    connect: Arc<ConnectOptions>,
    pool_opts: PoolOptions,
    opts: ClusterOptions,

    slots: Vec<SlotRange>,
    pools: BTreeMap<String, Pool>,
    latencies: BTreeMap<String, Duration>,
    closed: bool,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("seeds", &self.seeds)
            .field("slots", &self.slots.len())
            .field("pools", &self.pools.len())
            .finish()
    }
}

impl ClusterClient {
    /// Load the slot map from the first seed that answers.
    pub async fn connect(
        seeds: Vec<String>,
        connect: ConnectOptions,
        pool_opts: PoolOptions,
        opts: ClusterOptions,
    ) -> Result<Self, Error> {
        let mut client = ClusterClient {
            seeds,
            connect: Arc::new(connect),
            pool_opts,
            opts,
            slots: vec![],
            pools: BTreeMap::new(),
            latencies: BTreeMap::new(),
            closed: false,
        };

        client.refresh().await?;

        Ok(client)
    }

    fn pool(&mut self, addr: &str) -> &Pool {
        self.pools.entry(addr.to_string()).or_insert_with(|| {
            Pool::new(addr, Arc::clone(&self.connect), self.pool_opts)
        })
    }

    /// Reload the slot map, asking known masters first and then the seeds.
    pub async fn refresh(&mut self) -> Result<(), Error> {
        let mut candidates = self.masters();
        for seed in &self.seeds {
            if !candidates.contains(seed) {
                candidates.push(seed.clone());
            }
        }

        let mut last_err = Error::NoReachableNode;
        for addr in candidates {
            match self.pool(&addr).execute::<Value>(&["CLUSTER", "SLOTS"]).await {
                Ok(reply) => {
                    let host = addr
                        .rsplit_once(':')
                        .map_or(addr.as_str(), |(host, _)| host)
                        .trim_start_matches('[')
                        .trim_end_matches(']');
                    self.slots = parse_cluster_slots(&reply, host);
                    self.prune_pools();

                    debug!(
                        message = "cluster slot map loaded",
                        node = %addr,
                        ranges = self.slots.len()
                    );

                    if self.opts.route_by_latency && !self.opts.route_randomly {
                        self.measure_latencies().await;
                    }

                    return Ok(());
                }
                Err(err) => {
                    debug!(message = "load cluster slots failed", node = %addr, %err);
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    /// Close pools of nodes that left the slot map. Seeds are kept since
    /// refresh falls back to them.
    fn prune_pools(&mut self) {
        if self.slots.is_empty() {
            return;
        }

        let known = self
            .slots
            .iter()
            .flat_map(|range| std::iter::once(&range.master).chain(&range.replicas))
            .chain(&self.seeds)
            .cloned()
            .collect::<BTreeSet<_>>();

        self.pools.retain(|addr, pool| {
            if known.contains(addr) {
                return true;
            }

            debug!(message = "node left the cluster, closing its pool", node = %addr);
            pool.close();
            false
        });
        self.latencies.retain(|addr, _| known.contains(addr));
    }

    async fn measure_latencies(&mut self) {
        self.latencies.clear();

        for addr in self.nodes() {
            let start = Instant::now();
            if self.pool(&addr).execute::<()>(&["PING"]).await.is_ok() {
                self.latencies.insert(addr, start.elapsed());
            }
        }
    }

    /// Unique masters of the slot map, the seeds while it is empty.
    pub fn masters(&self) -> Vec<String> {
        if self.slots.is_empty() {
            return self.seeds.clone();
        }

        let mut masters: Vec<String> = vec![];
        for range in &self.slots {
            if !masters.contains(&range.master) {
                masters.push(range.master.clone());
            }
        }

        masters
    }

    /// Nodes eligible to serve keyless commands.
    fn nodes(&self) -> Vec<String> {
        let mut nodes = self.masters();
        if self.opts.read_only {
            for replica in self.slots.iter().flat_map(|range| &range.replicas) {
                if !nodes.contains(replica) {
                    nodes.push(replica.clone());
                }
            }
        }

        nodes
    }

    pub fn slots(&self) -> &[SlotRange] {
        &self.slots
    }

    fn pick(&self, candidates: &[String]) -> Option<String> {
        if self.opts.route_randomly {
            return candidates.choose(&mut rand::rng()).cloned();
        }

        if self.opts.route_by_latency {
            return candidates
                .iter()
                .min_by_key(|addr| self.latencies.get(*addr).copied().unwrap_or(Duration::MAX))
                .cloned();
        }

        candidates.first().cloned()
    }

    fn route(&self, cmds: &[&str]) -> Result<String, Error> {
        let range = key_of(cmds)
            .map(key_slot)
            .and_then(|slot| self.slots.iter().find(|range| range.contains(slot)));

        let candidates = match range {
            Some(range) => {
                let mut candidates = vec![range.master.clone()];
                if self.opts.read_only {
                    candidates.extend(range.replicas.iter().cloned());
                }
                candidates
            }
            None => self.nodes(),
        };

        self.pick(&candidates).ok_or(Error::NoReachableNode)
    }

    /// Run a command on the node owning its key, or any eligible node for
    /// keyless commands, following `MOVED` and `ASK` redirects.
    pub async fn execute<T: FromFrame>(&mut self, cmds: &[&str]) -> Result<T, Error> {
        if self.closed {
            return Err(Error::PoolClosed);
        }

        let mut addr = self.route(cmds)?;
        let mut asking = false;
        let mut redirects = 0;

        loop {
            let pool = self.pool(&addr);
            let result = if asking {
                pool.execute_asking(cmds).await
            } else {
                pool.execute(cmds).await
            };

            let to = match result {
                Err(Error::Moved { addr: to, .. }) => {
                    asking = false;
                    if let Err(err) = self.refresh().await {
                        debug!(message = "refresh slot map failed", %err);
                    }

                    to
                }
                Err(Error::Ask { addr: to, .. }) => {
                    asking = true;
                    to
                }
                Err(err) if err.is_connection_error() => {
                    // the node might be gone, the next command uses a new map
                    if let Err(err) = self.refresh().await {
                        debug!(message = "refresh slot map failed", %err);
                    }

                    return Err(err);
                }
                result => return result,
            };

            if redirects == self.opts.max_redirects {
                return Err(Error::TooManyRedirects(redirects));
            }
            redirects += 1;
            addr = to;
        }
    }

    /// Run a command on every master, one after another, and hand each
    /// result to `f`. A failing shard does not stop the iteration.
    pub async fn for_each_shard<T, F>(&mut self, cmds: &[&str], mut f: F)
    where
        T: FromFrame,
        F: FnMut(&str, Result<T, Error>) + Send,
    {
        for addr in self.masters() {
            let result = self.pool(&addr).execute(cmds).await;
            f(&addr, result);
        }
    }

    pub async fn warm_up(&mut self) -> Result<(), Error> {
        for addr in self.masters() {
            self.pool(&addr).warm_up().await?;
        }

        Ok(())
    }

    pub fn close(&mut self) {
        self.closed = true;
        for pool in self.pools.values() {
            pool.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{MockServer, array, bulk, error, int, simple};

    fn slots_reply(ranges: &[(u16, u16, &MockServer)]) -> String {
        array(
            ranges
                .iter()
                .map(|(start, end, server)| {
                    let (host, port) = server.host_port();
                    array(vec![
                        int(i64::from(*start)),
                        int(i64::from(*end)),
                        array(vec![bulk(&host), int(i64::from(port))]),
                    ])
                })
                .collect(),
        )
    }

    #[test]
    fn slot_of_keys() {
        assert_eq!(crc16(b"123456789"), 0x31c3);
        assert_eq!(key_slot("123456789"), 12739);
        assert_eq!(key_slot("foo"), 12182);
        assert_eq!(key_slot("{user1000}.following"), key_slot("{user1000}.followers"));
        assert_eq!(key_slot("{user1000}.following"), key_slot("user1000"));
        // empty tags hash the whole key
        assert_eq!(key_slot("foo{}{bar}"), crc16(b"foo{}{bar}") % SLOTS);
    }

    #[test]
    fn keyless() {
        assert_eq!(key_of(&["INFO", "memory"]), None);
        assert_eq!(key_of(&["cluster", "nodes"]), None);
        assert_eq!(key_of(&["XLEN", "mystream"]), Some("mystream"));
        assert_eq!(key_of(&["DBSIZE"]), None);
    }

    #[test]
    fn parse_slots() {
        let reply = Value::Array(vec![
            Value::Array(vec![
                Value::Int(0),
                Value::Int(5460),
                Value::Array(vec![
                    Value::Data("10.0.0.1".into()),
                    Value::Int(7000),
                    Value::Data("09dbe9720cda62f7865eabc5fd8857c5d2678366".into()),
                ]),
                Value::Array(vec![Value::Data("10.0.0.4".into()), Value::Int(7003)]),
            ]),
            Value::Array(vec![
                Value::Int(5461),
                Value::Int(10922),
                Value::Array(vec![Value::Data("".into()), Value::Int(7001)]),
            ]),
            Value::Array(vec![Value::Int(1)]),
        ]);

        let ranges = parse_cluster_slots(&reply, "10.0.0.9");
        assert_eq!(
            ranges,
            vec![
                SlotRange {
                    start: 0,
                    end: 5460,
                    master: "10.0.0.1:7000".into(),
                    replicas: vec!["10.0.0.4:7003".into()],
                },
                SlotRange {
                    start: 5461,
                    end: 10922,
                    master: "10.0.0.9:7001".into(),
                    replicas: vec![],
                },
            ]
        );
        assert_eq!(ranges[0].slot_count(), 5461);
    }

    #[tokio::test]
    async fn follow_moved() {
        let b = MockServer::start(|cmd| match cmd[0].as_str() {
            "GET" => bulk("from b"),
            _ => simple("PONG"),
        })
        .await;
        let a = MockServer::start(|cmd| match cmd[0].as_str() {
            "CLUSTER" => array(vec![]),
            "GET" => error("MOVED 12182 {b}"),
            _ => simple("PONG"),
        })
        .await;
        a.replace("{b}", &b.addr());

        let mut client = ClusterClient::connect(
            vec![a.addr()],
            ConnectOptions::default(),
            PoolOptions::default(),
            ClusterOptions::default(),
        )
        .await
        .unwrap();

        let got = client.execute::<String>(&["GET", "foo"]).await.unwrap();
        assert_eq!(got, "from b");
    }

    #[tokio::test]
    async fn follow_ask() {
        let b = MockServer::start(|cmd| match cmd[0].as_str() {
            "ASKING" => simple("OK"),
            "GET" => bulk("migrated"),
            _ => simple("PONG"),
        })
        .await;
        let a = MockServer::start(|cmd| match cmd[0].as_str() {
            "CLUSTER" => array(vec![]),
            "GET" => error("ASK 12182 {b}"),
            _ => simple("PONG"),
        })
        .await;
        a.replace("{b}", &b.addr());

        let mut client = ClusterClient::connect(
            vec![a.addr()],
            ConnectOptions::default(),
            PoolOptions::default(),
            ClusterOptions::default(),
        )
        .await
        .unwrap();

        let got = client.execute::<String>(&["GET", "foo"]).await.unwrap();
        assert_eq!(got, "migrated");
        assert_eq!(b.commands(), vec![vec!["ASKING"], vec!["GET", "foo"]]);
    }

    #[tokio::test]
    async fn too_many_redirects() {
        let a = MockServer::start(|cmd| match cmd[0].as_str() {
            "CLUSTER" => array(vec![]),
            "GET" => error("MOVED 12182 {self}"),
            _ => simple("PONG"),
        })
        .await;
        a.replace("{self}", &a.addr());

        let mut client = ClusterClient::connect(
            vec![a.addr()],
            ConnectOptions::default(),
            PoolOptions::default(),
            ClusterOptions {
                max_redirects: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let err = client.execute::<String>(&["GET", "foo"]).await.unwrap_err();
        assert!(matches!(err, Error::TooManyRedirects(2)), "{err:?}");
    }

    #[tokio::test]
    async fn keys_route_to_their_owner() {
        let low = MockServer::start(|cmd| match cmd[0].as_str() {
            "XLEN" => int(1),
            _ => simple("PONG"),
        })
        .await;
        let high = MockServer::start(|cmd| match cmd[0].as_str() {
            "XLEN" => int(2),
            _ => simple("PONG"),
        })
        .await;
        let reply = slots_reply(&[(0, 8191, &low), (8192, 16383, &high)]);
        let seed = MockServer::start(move |cmd| match cmd[0].as_str() {
            "CLUSTER" => reply.clone(),
            _ => simple("PONG"),
        })
        .await;

        let mut client = ClusterClient::connect(
            vec![seed.addr()],
            ConnectOptions::default(),
            PoolOptions::default(),
            ClusterOptions {
                route_by_latency: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(client.masters(), vec![low.addr(), high.addr()]);
        // "foo" hashes to 12182
        assert_eq!(client.execute::<i64>(&["XLEN", "foo"]).await.unwrap(), 2);
        // "b" hashes to 3300
        assert_eq!(client.execute::<i64>(&["XLEN", "b"]).await.unwrap(), 1);

        let mut seen = vec![];
        client
            .for_each_shard::<String, _>(&["PING"], |node, result| {
                seen.push((node.to_string(), result.is_ok()));
            })
            .await;
        assert_eq!(seen, vec![(low.addr(), true), (high.addr(), true)]);
    }

    #[tokio::test]
    async fn drop_pools_of_departed_nodes() {
        let slots = Arc::new(parking_lot::Mutex::new(String::new()));
        let handler = |slots: Arc<parking_lot::Mutex<String>>| {
            move |cmd: &[String]| match cmd[0].as_str() {
                "CLUSTER" => slots.lock().clone(),
                _ => simple("PONG"),
            }
        };
        let a = MockServer::start(handler(Arc::clone(&slots))).await;
        let b = MockServer::start(handler(Arc::clone(&slots))).await;
        *slots.lock() = slots_reply(&[(0, 8191, &a), (8192, 16383, &b)]);

        let mut client = ClusterClient::connect(
            vec![a.addr()],
            ConnectOptions::default(),
            PoolOptions::default(),
            ClusterOptions {
                route_by_latency: false,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        client
            .for_each_shard::<String, _>(&["PING"], |_, result| assert!(result.is_ok()))
            .await;
        assert_eq!(client.pools.len(), 2);

        // b hands its slots over to a and leaves
        *slots.lock() = slots_reply(&[(0, 16383, &a)]);
        client.refresh().await.unwrap();

        assert_eq!(client.masters(), vec![a.addr()]);
        assert_eq!(client.pools.keys().cloned().collect::<Vec<_>>(), vec![a.addr()]);
    }

    #[tokio::test]
    async fn no_seed_reachable() {
        let addr = testify::next_addr().to_string();
        let result = ClusterClient::connect(
            vec![addr],
            ConnectOptions::default(),
            PoolOptions {
                max_retries: 0,
                ..Default::default()
            },
            ClusterOptions::default(),
        )
        .await;

        assert!(result.is_err());
    }
}

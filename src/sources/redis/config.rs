use std::collections::BTreeMap;
use std::time::Duration;

use framework::config::{SecretString, default_interval, default_true};
use framework::tls::TlsConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "localhost:6379";
const DEFAULT_SLOWLOG_ENTRIES: usize = 128;

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

const fn default_max_conns() -> usize {
    10
}

const fn default_max_retries() -> usize {
    3
}

const fn default_max_redirects() -> usize {
    3
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_read_timeout() -> Duration {
    Duration::from_secs(3)
}

const fn default_write_timeout() -> Duration {
    Duration::from_secs(3)
}

const fn default_pool_timeout() -> Duration {
    Duration::from_secs(4)
}

const fn default_slowlog_entries() -> usize {
    DEFAULT_SLOWLOG_ENTRIES
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("endpoint must be specified")]
    MissingEndpoint,
    #[error("cluster mode requires at least one node")]
    MissingClusterNodes,
    #[error("sentinel mode requires master_name")]
    MissingMasterName,
    #[error("sentinel mode requires at least one sentinel address")]
    MissingSentinelAddrs,
    #[error("cluster and sentinel can not be enabled at the same time")]
    ConflictingTopology,
    #[error("collection_interval must be greater than 0")]
    InvalidInterval,
    #[error("max_conns must be greater than 0")]
    InvalidMaxConns,
    #[error("min_idle_conns ({min_idle}) must not exceed max_conns ({max_conns})")]
    InvalidMinIdle { min_idle: usize, max_conns: usize },
    #[error("custom command #{index}: {reason}")]
    InvalidCustomCommand { index: usize, reason: &'static str },
    #[error("tls cert_file and key_file must be set together")]
    TlsCertKeyMismatch,
}

/// Which deployment the receiver talks to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Topology {
    Standalone,
    Cluster,
    Sentinel,
}

/// Collect metrics from a Redis standalone server, cluster or a sentinel
/// monitored failover setup.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address of a standalone server, `host:port`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// ACL user, Redis 6 and later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretString>,

    /// Database selected after connecting, ignored in cluster mode.
    #[serde(default)]
    pub database: u32,

    /// Duration between each scrape.
    #[serde(default = "default_interval", with = "humanize::duration::serde")]
    pub collection_interval: Duration,

    /// Maximum number of connections per node.
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,

    /// Connections opened while starting and kept idle.
    #[serde(default)]
    pub min_idle_conns: usize,

    /// How many times a command is retried on a fresh connection after a
    /// network error.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_connect_timeout", with = "humanize::duration::serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_read_timeout", with = "humanize::duration::serde")]
    pub read_timeout: Duration,

    #[serde(default = "default_write_timeout", with = "humanize::duration::serde")]
    pub write_timeout: Duration,

    /// How long a command waits for a free connection.
    #[serde(default = "default_pool_timeout", with = "humanize::duration::serde")]
    pub pool_timeout: Duration,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub sentinel: SentinelConfig,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub slow_log: SlowLogConfig,

    /// Static attributes added to the resource of every batch.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_attributes: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            username: None,
            password: None,
            database: 0,
            collection_interval: default_interval(),
            max_conns: default_max_conns(),
            min_idle_conns: 0,
            max_retries: default_max_retries(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            pool_timeout: default_pool_timeout(),
            cluster: ClusterConfig::default(),
            sentinel: SentinelConfig::default(),
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
            slow_log: SlowLogConfig::default(),
            resource_attributes: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Seed nodes, the rest of the cluster is discovered from them.
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Allow commands to be served by replicas.
    #[serde(default)]
    pub read_only: bool,

    /// Send commands to the node with the lowest PING latency.
    #[serde(default = "default_true")]
    pub route_by_latency: bool,

    /// Send commands to a random node, wins over `route_by_latency`.
    #[serde(default)]
    pub route_randomly: bool,

    /// Run `INFO` against every node of the cluster.
    #[serde(default = "default_true")]
    pub collect_per_node_metrics: bool,

    #[serde(default = "default_true")]
    pub collect_cluster_info: bool,

    #[serde(default = "default_true")]
    pub collect_slot_metrics: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            nodes: vec![],
            max_redirects: default_max_redirects(),
            read_only: false,
            route_by_latency: true,
            route_randomly: false,
            collect_per_node_metrics: true,
            collect_cluster_info: true,
            collect_slot_metrics: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SentinelConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Name of the monitored master.
    #[serde(default)]
    pub master_name: String,

    #[serde(default)]
    pub sentinel_addrs: Vec<String>,

    /// Password of the sentinels, which may differ from the data nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentinel_password: Option<SecretString>,

    #[serde(default = "default_true")]
    pub collect_sentinel_metrics: bool,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            master_name: String::new(),
            sentinel_addrs: vec![],
            sentinel_password: None,
            collect_sentinel_metrics: true,
        }
    }
}

/// `INFO` sections to query.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerInfoConfig {
    #[serde(default = "default_true")]
    pub server: bool,
    #[serde(default = "default_true")]
    pub clients: bool,
    #[serde(default = "default_true")]
    pub memory: bool,
    #[serde(default = "default_true")]
    pub persistence: bool,
    #[serde(default = "default_true")]
    pub stats: bool,
    #[serde(default = "default_true")]
    pub replication: bool,
    #[serde(default = "default_true")]
    pub cpu: bool,
    #[serde(default = "default_true")]
    pub cluster: bool,
    #[serde(default = "default_true")]
    pub keyspace: bool,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            server: true,
            clients: true,
            memory: true,
            persistence: true,
            stats: true,
            replication: true,
            cpu: true,
            cluster: true,
            keyspace: true,
        }
    }
}

impl ServerInfoConfig {
    /// Enabled sections in `INFO` order. The cluster section only makes
    /// sense against a cluster.
    pub fn sections(&self, cluster_mode: bool) -> Vec<&'static str> {
        [
            ("server", self.server),
            ("clients", self.clients),
            ("memory", self.memory),
            ("persistence", self.persistence),
            ("stats", self.stats),
            ("replication", self.replication),
            ("cpu", self.cpu),
            ("cluster", self.cluster && cluster_mode),
            ("keyspace", self.keyspace),
        ]
        .into_iter()
        .filter_map(|(name, enabled)| enabled.then_some(name))
        .collect()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub server_info: ServerInfoConfig,

    /// Per command calls and time, from `INFO commandstats`.
    #[serde(default = "default_true")]
    pub command_stats: bool,

    /// Per database keys, expires and average ttl, needs the keyspace
    /// section of `server_info` too.
    #[serde(default = "default_true")]
    pub keyspace_stats: bool,

    #[serde(default = "default_true")]
    pub latency_stats: bool,

    #[serde(default = "default_true")]
    pub memory_stats: bool,

    /// Aggregates `CLIENT LIST`, which is expensive on servers with many
    /// connections.
    #[serde(default)]
    pub client_list: bool,

    /// Loaded modules, from `MODULE LIST`.
    #[serde(default = "default_true")]
    pub module_list: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_commands: Vec<CustomCommand>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            server_info: ServerInfoConfig::default(),
            command_stats: true,
            keyspace_stats: true,
            latency_stats: true,
            memory_stats: true,
            client_list: false,
            module_list: true,
            custom_commands: vec![],
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomMetricType {
    Gauge,
    Counter,
    /// Recorded as a gauge of the reply value
    Histogram,
}

/// A user defined command whose reply becomes a metric.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CustomCommand {
    /// Metric name.
    pub name: String,

    /// Redis command, e.g. `XLEN`.
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(rename = "type")]
    pub typ: CustomMetricType,

    #[serde(default)]
    pub description: String,

    /// Index of the element to use when the reply is an array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_extractor: Option<usize>,

    /// Static attributes of the emitted metric.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SlowLogConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Entries fetched by `SLOWLOG GET`, 0 means the default.
    #[serde(default = "default_slowlog_entries")]
    pub max_entries: usize,

    /// Count slow entries per command.
    #[serde(default = "default_true")]
    pub include_commands: bool,

    /// Only record entries that were not seen by a previous scrape.
    #[serde(default = "default_true")]
    pub track_position: bool,
}

impl Default for SlowLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: DEFAULT_SLOWLOG_ENTRIES,
            include_commands: true,
            track_position: true,
        }
    }
}

impl SlowLogConfig {
    pub fn max_entries(&self) -> usize {
        if self.max_entries == 0 {
            DEFAULT_SLOWLOG_ENTRIES
        } else {
            self.max_entries
        }
    }
}

impl Config {
    pub fn topology(&self) -> Topology {
        if self.cluster.enabled {
            Topology::Cluster
        } else if self.sentinel.enabled {
            Topology::Sentinel
        } else {
            Topology::Standalone
        }
    }

    /// Identifies the monitored deployment in the resource attributes.
    pub fn instance(&self) -> String {
        match self.topology() {
            Topology::Standalone => self.endpoint.clone(),
            Topology::Cluster => self.cluster.nodes.first().cloned().unwrap_or_default(),
            Topology::Sentinel => format!("sentinel/{}", self.sentinel.master_name),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cluster.enabled && self.sentinel.enabled {
            return Err(ValidationError::ConflictingTopology);
        }

        match self.topology() {
            Topology::Standalone => {
                if self.endpoint.is_empty() {
                    return Err(ValidationError::MissingEndpoint);
                }
            }
            Topology::Cluster => {
                if self.cluster.nodes.is_empty() {
                    return Err(ValidationError::MissingClusterNodes);
                }
            }
            Topology::Sentinel => {
                if self.sentinel.master_name.is_empty() {
                    return Err(ValidationError::MissingMasterName);
                }
                if self.sentinel.sentinel_addrs.is_empty() {
                    return Err(ValidationError::MissingSentinelAddrs);
                }
            }
        }

        if self.collection_interval.is_zero() {
            return Err(ValidationError::InvalidInterval);
        }

        if self.max_conns == 0 {
            return Err(ValidationError::InvalidMaxConns);
        }

        if self.min_idle_conns > self.max_conns {
            return Err(ValidationError::InvalidMinIdle {
                min_idle: self.min_idle_conns,
                max_conns: self.max_conns,
            });
        }

        for (index, cmd) in self.metrics.custom_commands.iter().enumerate() {
            let reason = if cmd.name.is_empty() {
                "name is required"
            } else if cmd.command.is_empty() {
                "command is required"
            } else {
                continue;
            };

            return Err(ValidationError::InvalidCustomCommand { index, reason });
        }

        if self.tls.validate().is_err() {
            return Err(ValidationError::TlsCertKeyMismatch);
        }

        Ok(())
    }
}

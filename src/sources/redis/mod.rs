//! Redis receiver, scrapes standalone servers, clusters and sentinel
//! monitored masters.
//!
//! Every collection cycle runs the metric families below in a fixed
//! order. A failing family is logged and skipped, the others still end up
//! in the batch.
//!
//! 1. server info, `INFO`
//! 2. command stats, `INFO commandstats`
//! 3. latency, `LATENCY LATEST` and `LATENCY HISTOGRAM`
//! 4. memory, `MEMORY STATS`
//! 5. clients, `CLIENT LIST`
//! 6. modules, `MODULE LIST`
//! 7. slow log, `SLOWLOG GET`
//! 8. cluster, `CLUSTER INFO`, `CLUSTER NODES`, `CLUSTER SLOTS` and `INFO`
//!    of every shard
//! 9. sentinel, `SENTINEL MASTERS`, `SENTINEL MASTER` and `SENTINEL REPLICAS`
//! 10. custom commands

mod builder;
mod client;
mod clients;
mod cluster;
mod config;
mod custom;
mod info;
mod latency;
mod memory;
mod modules;
mod sentinel;
mod slowlog;


use std::future::Future;

use async_trait::async_trait;
use chrono::Utc;
use event::tags::Tags;
use event::{MetricBatch, Scope};
use framework::shutdown::ShutdownSignal;
use framework::tls::TlsError;
use framework::{Factory, Receiver, ReceiverContext, Scraper, ScraperController};

use builder::MetricBuilder;
use client::{Client, Error, Value};
pub use config::{
    ClusterConfig, Config, CustomCommand, CustomMetricType, MetricsConfig, SentinelConfig,
    ServerInfoConfig, SlowLogConfig, Topology, ValidationError,
};

const SCOPE_NAME: &str = "otelcol/redis";

/// Why the receiver could not start.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("load tls config failed, {0}")]
    Tls(TlsError),

    #[error("connect to redis failed, {0}")]
    Connect(Error),
}

impl From<Error> for BuildError {
    fn from(err: Error) -> Self {
        match err {
            Error::Tls(err) => BuildError::Tls(err),
            err => BuildError::Connect(err),
        }
    }
}

pub struct RedisFactory;

impl Factory for RedisFactory {
    type Config = Config;

    fn component_type(&self) -> &'static str {
        "redis"
    }

    fn default_config(&self) -> Config {
        Config::default()
    }

    fn create_metrics_receiver(
        &self,
        cx: ReceiverContext,
        config: Config,
    ) -> framework::Result<Receiver> {
        config.validate()?;

        let interval = config.collection_interval;
        let scraper = RedisScraper::new(config);

        Ok(Box::pin(ScraperController::new(cx, interval, scraper).run()))
    }
}

pub struct RedisScraper {
    config: Config,
    client: Option<Client>,
    /// Highest slow log id seen so far, in memory only
    last_slowlog_id: Option<i64>,
}

impl RedisScraper {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: None,
            last_slowlog_id: None,
        }
    }

    fn resource(&self) -> Tags {
        let mut resource = event::tags!("redis.instance" => self.config.instance());
        if self.config.database > 0 {
            resource.insert("redis.database", self.config.database);
        }
        for (key, value) in &self.config.resource_attributes {
            resource.insert(key, value);
        }

        resource
    }
}

#[async_trait]
impl Scraper for RedisScraper {
    async fn start(&mut self, shutdown: &ShutdownSignal) -> framework::Result<()> {
        let client = cancellable(shutdown, Client::establish(&self.config))
            .await
            .map_err(BuildError::from)?;

        info!(
            message = "connected to redis",
            instance = %self.config.instance(),
            topology = ?client.topology(),
        );

        self.client = Some(client);

        Ok(())
    }

    async fn scrape(&mut self, shutdown: &ShutdownSignal) -> framework::Result<MetricBatch> {
        let resource = self.resource();
        let Some(client) = self.client.as_mut() else {
            return Err("receiver not started".into());
        };
        let config = &self.config;
        let metrics = &config.metrics;
        let mut mb = MetricBuilder::new(Utc::now());

        report(
            "server_info",
            cancellable(shutdown, server_info(client, &mut mb, config)).await,
        );

        if metrics.command_stats {
            report(
                "command_stats",
                cancellable(shutdown, command_stats(client, &mut mb)).await,
            );
        }

        if metrics.latency_stats {
            report(
                "latency_stats",
                cancellable(shutdown, latency_stats(client, &mut mb)).await,
            );
        }

        if metrics.memory_stats {
            let result = cancellable(shutdown, client.execute(&["MEMORY", "STATS"]))
                .await
                .map(|stats: Vec<(String, Value)>| memory::record_memory_stats(&mut mb, &stats));
            report("memory_stats", result);
        }

        if metrics.client_list {
            let result = cancellable(shutdown, client.execute(&["CLIENT", "LIST"]))
                .await
                .map(|text: String| clients::record_client_list(&mut mb, &text));
            report("client_list", result);
        }

        if metrics.module_list {
            let result = match cancellable(shutdown, client.request(&["MODULE", "LIST"])).await {
                Ok(reply) => {
                    modules::record_modules(&mut mb, &reply);
                    Ok(())
                }
                // not supported before Redis 4
                Err(Error::UnknownCommand(_)) => Ok(()),
                Err(err) => Err(err),
            };
            report("module_list", result);
        }

        if config.slow_log.enabled {
            let result = cancellable(
                shutdown,
                slow_log(client, &mut mb, config, &mut self.last_slowlog_id),
            )
            .await;
            report("slow_log", result);
        }

        if config.topology() == Topology::Cluster {
            cluster_metrics(client, &mut mb, config, shutdown).await;
        }

        if config.topology() == Topology::Sentinel && config.sentinel.collect_sentinel_metrics {
            report(
                "sentinel",
                cancellable(shutdown, sentinel_metrics(client, &mut mb, config)).await,
            );
        }

        for def in &metrics.custom_commands {
            let mut cmds = Vec::with_capacity(def.args.len() + 1);
            cmds.push(def.command.as_str());
            cmds.extend(def.args.iter().map(String::as_str));

            match cancellable(shutdown, client.request(&cmds)).await {
                Ok(reply) => custom::record_custom(&mut mb, def, &reply),
                Err(err) => {
                    warn!(
                        message = "collect metrics failed",
                        family = "custom_commands",
                        name = %def.name,
                        %err
                    );
                }
            }
        }

        let mut batch = MetricBatch::new(
            Scope {
                name: SCOPE_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            resource,
        );
        batch.extend(mb.finish());

        Ok(batch)
    }

    async fn shutdown(&mut self) -> framework::Result<()> {
        if let Some(mut client) = self.client.take() {
            client.close();
            debug!(message = "redis connections closed", instance = %self.config.instance());
        }

        Ok(())
    }
}

/// Abandon `fut` once shutdown begins.
async fn cancellable<T, F>(shutdown: &ShutdownSignal, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;

        _ = shutdown.triggered() => Err(Error::Cancelled),
        result = fut => result,
    }
}

#[inline]
fn report(family: &'static str, result: Result<(), Error>) {
    if let Err(err) = result {
        warn!(message = "collect metrics failed", family, %err);
    }
}

async fn server_info(
    client: &mut Client,
    mb: &mut MetricBuilder,
    config: &Config,
) -> Result<(), Error> {
    let cluster_mode = config.topology() == Topology::Cluster;
    let sections = config.metrics.server_info.sections(cluster_mode);
    if sections.is_empty() {
        return Ok(());
    }

    let full = ServerInfoConfig::default().sections(cluster_mode);
    let text = if sections.len() == full.len() {
        client.execute::<String>(&["INFO"]).await?
    } else {
        // multiple sections need Redis 7
        let mut cmds = vec!["INFO"];
        cmds.extend(sections.iter().copied());

        match client.execute::<String>(&cmds).await {
            Ok(text) => text,
            Err(Error::Server(_) | Error::UnknownCommand(_)) => {
                client.execute::<String>(&["INFO"]).await?
            }
            Err(err) => return Err(err),
        }
    };

    let info = info::parse_info(&text);
    info::record_server_info(mb, &info, &sections, config.metrics.keyspace_stats);

    Ok(())
}

async fn command_stats(client: &mut Client, mb: &mut MetricBuilder) -> Result<(), Error> {
    let text = client.execute::<String>(&["INFO", "commandstats"]).await?;
    info::record_command_stats(mb, &info::parse_info(&text));

    Ok(())
}

async fn latency_stats(client: &mut Client, mb: &mut MetricBuilder) -> Result<(), Error> {
    let latest = client.request(&["LATENCY", "LATEST"]).await?;
    latency::record_latest(mb, &latest);

    match client.request(&["LATENCY", "HISTOGRAM"]).await {
        Ok(reply) => latency::record_histogram(mb, &reply),
        Err(Error::UnknownCommand(err)) => {
            debug!(message = "latency histogram is not supported", %err);
        }
        Err(err) => return Err(err),
    }

    Ok(())
}

async fn slow_log(
    client: &mut Client,
    mb: &mut MetricBuilder,
    config: &Config,
    last_id: &mut Option<i64>,
) -> Result<(), Error> {
    let count = config.slow_log.max_entries().to_string();
    let reply = client.request(&["SLOWLOG", "GET", &count]).await?;

    let mut entries = slowlog::parse_slowlog(&reply);
    if config.slow_log.track_position {
        let (fresh, mark) = slowlog::filter_new_entries(entries, *last_id);
        entries = fresh;
        *last_id = mark;
    }

    slowlog::record_slowlog(mb, &entries, config.slow_log.include_commands);

    Ok(())
}

async fn cluster_metrics(
    client: &mut Client,
    mb: &mut MetricBuilder,
    config: &Config,
    shutdown: &ShutdownSignal,
) {
    if config.cluster.collect_cluster_info {
        let result = cancellable(shutdown, client.execute::<String>(&["CLUSTER", "INFO"]))
            .await
            .map(|text| cluster::record_cluster_info(mb, &text));
        report("cluster_info", result);

        let result = cancellable(shutdown, client.execute::<String>(&["CLUSTER", "NODES"]))
            .await
            .map(|text| cluster::record_cluster_nodes(mb, &text));
        report("cluster_nodes", result);
    }

    let Some(nodes) = client.as_cluster() else {
        return;
    };

    if config.cluster.collect_slot_metrics {
        let result = cancellable(shutdown, nodes.refresh())
            .await
            .map(|_| cluster::record_slots(mb, nodes.slots()));
        report("cluster_slots", result);
    }

    if config.cluster.collect_per_node_metrics {
        let fan_out = nodes.for_each_shard::<String, _>(&["INFO"], |node, result| match result {
            Ok(text) => cluster::record_node_info(mb, node, &info::parse_info(&text)),
            Err(err) => {
                warn!(message = "collect node metrics failed", %node, %err);
            }
        });

        tokio::select! {
            biased;

            _ = shutdown.triggered() => report("cluster_node_info", Err(Error::Cancelled)),
            _ = fan_out => {}
        }
    }
}

async fn sentinel_metrics(
    client: &mut Client,
    mb: &mut MetricBuilder,
    config: &Config,
) -> Result<(), Error> {
    let Some(failover) = client.as_failover() else {
        return Ok(());
    };
    let Some(addr) = failover.sentinels().first() else {
        return Ok(());
    };

    let master = &config.sentinel.master_name;
    let state = sentinel::fetch(addr, master, failover.sentinel_options()).await?;
    sentinel::record_sentinel(mb, master, &state);

    Ok(())
}

//! Connection manager, a small Redis client speaking RESP2 over plain TCP
//! or TLS against standalone servers, clusters and sentinel monitored
//! failover deployments.

mod cluster;
mod connection;
mod failover;
mod frame;
mod pool;

use std::num::ParseIntError;
use std::str::Utf8Error;
use std::sync::Arc;

use framework::tls::TlsError;

pub use cluster::{ClusterClient, ClusterOptions, SlotRange};
pub use connection::{ConnectOptions, Connection};
pub use failover::FailoverClient;
pub use frame::{FromFrame, Value};
pub use pool::{Pool, PoolOptions};

use super::config::{Config, Topology};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error(transparent)]
    Tls(TlsError),

    #[error("{0}")]
    UnknownCommand(String),

    #[error("server error {0}")]
    Server(String),

    #[error("slot {slot} moved to {addr}")]
    Moved { slot: u16, addr: String },

    #[error("slot {slot} is migrating to {addr}")]
    Ask { slot: u16, addr: String },

    #[error("too many redirects ({0})")]
    TooManyRedirects(usize),

    #[error("parse frame failed, {0}")]
    Parse(String),

    #[error("unknown frame type")]
    UnknownFrameType,

    #[error("unexpected reply, want {0}")]
    UnexpectedReply(&'static str),

    #[error("timed out waiting for a free connection")]
    PoolTimeout,

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("no reachable node")]
    NoReachableNode,

    #[error("master {0:?} not found by any sentinel")]
    MasterNotFound(String),

    #[error("cancelled by shutdown")]
    Cancelled,
}

impl From<ParseIntError> for Error {
    fn from(err: ParseIntError) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<TlsError> for Error {
    fn from(err: TlsError) -> Self {
        match err {
            TlsError::Connect(err) => Error::Io(err),
            err => Error::Tls(err),
        }
    }
}

impl Error {
    /// Classify a top level error reply.
    pub(crate) fn from_reply(reply: &str) -> Self {
        let (kind, rest) = reply.split_once(' ').unwrap_or((reply, ""));

        match kind {
            "MOVED" | "ASK" => {
                let Some((slot, addr)) = rest.split_once(' ') else {
                    return Error::Server(reply.to_string());
                };
                let Ok(slot) = slot.parse::<u16>() else {
                    return Error::Server(reply.to_string());
                };

                let addr = addr.to_string();
                if kind == "MOVED" {
                    Error::Moved { slot, addr }
                } else {
                    Error::Ask { slot, addr }
                }
            }
            "ERR"
                if rest.starts_with("unknown command")
                    || rest.starts_with("unknown subcommand") =>
            {
                Error::UnknownCommand(reply.to_string())
            }
            _ => Error::Server(reply.to_string()),
        }
    }

    /// The connection is gone or in an unknown state, trying again on a new
    /// connection might help.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Timeout(_))
    }

    /// The node we talk to is no longer the master.
    pub fn is_readonly(&self) -> bool {
        matches!(self, Error::Server(msg) if msg.starts_with("READONLY"))
    }
}

/// The connection handle of one receiver, bound to one of the three
/// topologies.
#[derive(Debug)]
pub enum Client {
    Standalone(Pool),
    Cluster(ClusterClient),
    Failover(FailoverClient),
}

impl Client {
    /// Connect according to the configured topology and make sure the
    /// target answers `PING`.
    pub async fn establish(config: &Config) -> Result<Self, Error> {
        let tls = config.tls.connector()?;
        let connect = ConnectOptions {
            username: config.username.clone(),
            password: config.password.clone(),
            database: config.database,
            read_only: false,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            tls,
        };
        let pool = PoolOptions {
            max_conns: config.max_conns,
            min_idle: config.min_idle_conns,
            max_retries: config.max_retries,
            pool_timeout: config.pool_timeout,
        };

        let mut client = match config.topology() {
            Topology::Standalone => {
                Client::Standalone(Pool::new(&config.endpoint, Arc::new(connect), pool))
            }
            Topology::Cluster => {
                let connect = ConnectOptions {
                    // SELECT is not allowed in cluster mode
                    database: 0,
                    read_only: config.cluster.read_only,
                    ..connect
                };
                let opts = ClusterOptions {
                    max_redirects: config.cluster.max_redirects,
                    read_only: config.cluster.read_only,
                    route_by_latency: config.cluster.route_by_latency,
                    route_randomly: config.cluster.route_randomly,
                };

                Client::Cluster(
                    ClusterClient::connect(config.cluster.nodes.clone(), connect, pool, opts)
                        .await?,
                )
            }
            Topology::Sentinel => {
                let sentinel = ConnectOptions {
                    username: None,
                    password: config.sentinel.sentinel_password.clone(),
                    database: 0,
                    ..connect.clone()
                };

                Client::Failover(
                    FailoverClient::connect(
                        config.sentinel.master_name.clone(),
                        config.sentinel.sentinel_addrs.clone(),
                        sentinel,
                        connect,
                        pool,
                    )
                    .await?,
                )
            }
        };

        let result = match client.warm_up().await {
            Ok(()) => client.execute::<String>(&["PING"]).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            client.close();
            return Err(err);
        }

        Ok(client)
    }

    async fn warm_up(&mut self) -> Result<(), Error> {
        match self {
            Client::Standalone(pool) => pool.warm_up().await,
            Client::Cluster(cluster) => cluster.warm_up().await,
            Client::Failover(failover) => failover.warm_up().await,
        }
    }

    /// Run one command, the caller decides the reply shape.
    pub async fn execute<T: FromFrame>(&mut self, cmds: &[&str]) -> Result<T, Error> {
        match self {
            Client::Standalone(pool) => pool.execute(cmds).await,
            Client::Cluster(cluster) => cluster.execute(cmds).await,
            Client::Failover(failover) => failover.execute(cmds).await,
        }
    }

    #[inline]
    pub async fn request(&mut self, cmds: &[&str]) -> Result<Value, Error> {
        self.execute(cmds).await
    }

    pub fn as_cluster(&mut self) -> Option<&mut ClusterClient> {
        match self {
            Client::Cluster(cluster) => Some(cluster),
            _ => None,
        }
    }

    pub fn as_failover(&self) -> Option<&FailoverClient> {
        match self {
            Client::Failover(failover) => Some(failover),
            _ => None,
        }
    }

    pub fn topology(&self) -> Topology {
        match self {
            Client::Standalone(_) => Topology::Standalone,
            Client::Cluster(_) => Topology::Cluster,
            Client::Failover(_) => Topology::Sentinel,
        }
    }

    /// Release every connection, calling it again is a no-op.
    pub fn close(&mut self) {
        match self {
            Client::Standalone(pool) => pool.close(),
            Client::Cluster(cluster) => cluster.close(),
            Client::Failover(failover) => failover.close(),
        }
    }
}

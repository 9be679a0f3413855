use std::sync::Arc;

use super::Error;
use super::connection::{ConnectOptions, Connection};
use super::frame::FromFrame;
use super::pool::{Pool, PoolOptions};

/// Client of a master monitored by sentinels. The master is looked up from
/// the sentinels and looked up again once it stops answering or turns
/// into a replica.
pub struct FailoverClient {
    master_name: String,
    sentinels: Vec<String>,
    sentinel_opts: ConnectOptions,
    connect: Arc<ConnectOptions>,
    pool_opts: PoolOptions,

    pool: Pool,
}

impl std::fmt::Debug for FailoverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverClient")
            .field("master_name", &self.master_name)
            .field("sentinels", &self.sentinels)
            .field("master", &self.master_addr())
            .finish()
    }
}

/// Ask the sentinels, in order, where the master currently lives.
pub async fn resolve_master(
    master_name: &str,
    sentinels: &[String],
    opts: &ConnectOptions,
) -> Result<String, Error> {
    for sentinel in sentinels {
        let result = match Connection::connect(sentinel, opts).await {
            Ok(mut conn) => {
                conn.request::<Option<Vec<String>>>(&[
                    "SENTINEL",
                    "get-master-addr-by-name",
                    master_name,
                ])
                .await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(Some(addr)) if addr.len() == 2 => {
                let addr = format!("{}:{}", addr[0], addr[1]);
                debug!(message = "master resolved", master = master_name, %sentinel, %addr);

                return Ok(addr);
            }
            Ok(_) => {
                debug!(message = "sentinel does not know the master", master = master_name, %sentinel);
            }
            Err(err) => {
                warn!(message = "query sentinel failed", %sentinel, %err);
            }
        }
    }

    Err(Error::MasterNotFound(master_name.to_string()))
}

impl FailoverClient {
    pub async fn connect(
        master_name: String,
        sentinels: Vec<String>,
        sentinel_opts: ConnectOptions,
        connect: ConnectOptions,
        pool_opts: PoolOptions,
    ) -> Result<Self, Error> {
        let addr = resolve_master(&master_name, &sentinels, &sentinel_opts).await?;
        let connect = Arc::new(connect);
        let pool = Pool::new(addr, Arc::clone(&connect), pool_opts);

        Ok(FailoverClient {
            master_name,
            sentinels,
            sentinel_opts,
            connect,
            pool_opts,
            pool,
        })
    }

    #[inline]
    pub fn master_addr(&self) -> &str {
        self.pool.addr()
    }

    #[inline]
    pub fn sentinels(&self) -> &[String] {
        &self.sentinels
    }

    /// Options for talking to the sentinels themselves.
    #[inline]
    pub fn sentinel_options(&self) -> &ConnectOptions {
        &self.sentinel_opts
    }

    pub async fn warm_up(&mut self) -> Result<(), Error> {
        self.pool.warm_up().await
    }

    pub async fn execute<T: FromFrame>(&mut self, cmds: &[&str]) -> Result<T, Error> {
        match self.pool.execute(cmds).await {
            Err(err) if err.is_connection_error() || err.is_readonly() => {
                if self.pool.is_closed() {
                    return Err(err);
                }

                warn!(
                    message = "master unavailable, asking sentinels again",
                    master = %self.master_name,
                    addr = %self.pool.addr(),
                    %err
                );

                let addr =
                    resolve_master(&self.master_name, &self.sentinels, &self.sentinel_opts)
                        .await?;
                if addr != self.pool.addr() {
                    let pool = Pool::new(addr, Arc::clone(&self.connect), self.pool_opts);
                    std::mem::replace(&mut self.pool, pool).close();
                }

                self.pool.execute(cmds).await
            }
            result => result,
        }
    }

    pub fn close(&mut self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{MockServer, array, bulk, error, int, null, simple};

    #[tokio::test]
    async fn skip_sentinels_without_the_master() {
        let unknown = MockServer::start(|_| null()).await;
        let good = MockServer::start(|_| array(vec![bulk("10.0.0.1"), bulk("6379")])).await;

        let addr = resolve_master(
            "mymaster",
            &[testify::next_addr().to_string(), unknown.addr(), good.addr()],
            &ConnectOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(addr, "10.0.0.1:6379");

        let err = resolve_master("mymaster", &[unknown.addr()], &ConnectOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MasterNotFound(_)));
    }

    #[tokio::test]
    async fn follow_the_promoted_replica() {
        let new_master = MockServer::start(|cmd| match cmd[0].as_str() {
            "DBSIZE" => int(2),
            _ => simple("PONG"),
        })
        .await;
        let old_master = MockServer::start(|cmd| match cmd[0].as_str() {
            "DBSIZE" => error("READONLY You can't write against a read only replica."),
            _ => simple("PONG"),
        })
        .await;

        let failed_over = Arc::new(AtomicBool::new(false));
        let (old_host, old_port) = old_master.host_port();
        let (new_host, new_port) = new_master.host_port();
        let flag = Arc::clone(&failed_over);
        let sentinel = MockServer::start(move |_| {
            if flag.load(Ordering::SeqCst) {
                array(vec![bulk(&new_host), bulk(&new_port.to_string())])
            } else {
                array(vec![bulk(&old_host), bulk(&old_port.to_string())])
            }
        })
        .await;

        let mut client = FailoverClient::connect(
            "mymaster".into(),
            vec![sentinel.addr()],
            ConnectOptions::default(),
            ConnectOptions::default(),
            PoolOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(client.master_addr(), old_master.addr());

        failed_over.store(true, Ordering::SeqCst);
        assert_eq!(client.execute::<i64>(&["DBSIZE"]).await.unwrap(), 2);
        assert_eq!(client.master_addr(), new_master.addr());
    }
}

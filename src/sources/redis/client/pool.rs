use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::Error;
use super::connection::{ConnectOptions, Connection};
use super::frame::FromFrame;

#[derive(Clone, Copy, Debug)]
pub struct PoolOptions {
    pub max_conns: usize,
    pub min_idle: usize,
    pub max_retries: usize,
    pub pool_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_conns: 10,
            min_idle: 0,
            max_retries: 3,
            pool_timeout: Duration::from_secs(4),
        }
    }
}

/// Bounded set of connections to one node.
pub struct Pool {
    addr: String,
    connect: Arc<ConnectOptions>,
    opts: PoolOptions,
    idle: Mutex<Vec<Connection>>,
    permits: Semaphore,
    closed: AtomicBool,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("addr", &self.addr)
            .field("idle", &self.idle.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Pool {
    pub fn new(addr: impl Into<String>, connect: Arc<ConnectOptions>, opts: PoolOptions) -> Self {
        Self {
            addr: addr.into(),
            connect,
            opts,
            idle: Mutex::new(Vec::with_capacity(opts.max_conns)),
            permits: Semaphore::new(opts.max_conns.max(1)),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open `min_idle` connections up front.
    pub async fn warm_up(&self) -> Result<(), Error> {
        let want = self.opts.min_idle.min(self.opts.max_conns);

        loop {
            let idle = self.idle.lock().len();
            if idle >= want {
                break;
            }

            let conn = Connection::connect(&self.addr, &self.connect).await?;
            self.idle.lock().push(conn);
        }

        Ok(())
    }

    pub async fn execute<T: FromFrame>(&self, cmds: &[&str]) -> Result<T, Error> {
        self.run(cmds, false).await
    }

    /// Send `ASKING` before the command, used to follow an `ASK` redirect.
    pub async fn execute_asking<T: FromFrame>(&self, cmds: &[&str]) -> Result<T, Error> {
        self.run(cmds, true).await
    }

    async fn run<T: FromFrame>(&self, cmds: &[&str], asking: bool) -> Result<T, Error> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let _permit = tokio::time::timeout(self.opts.pool_timeout, self.permits.acquire())
            .await
            .map_err(|_| Error::PoolTimeout)?
            .map_err(|_| Error::PoolClosed)?;

        let mut attempts = 0;
        loop {
            let result = match self.get().await {
                Ok(mut conn) => {
                    let result = if asking {
                        conn.asking(cmds).await
                    } else {
                        conn.request(cmds).await
                    };
                    self.put(conn);

                    result
                }
                Err(err) => Err(err),
            };

            match result {
                Err(err) if err.is_connection_error() && attempts < self.opts.max_retries => {
                    attempts += 1;

                    debug!(
                        message = "retry command on a fresh connection",
                        addr = %self.addr,
                        attempts,
                        %err
                    );
                }
                result => return result,
            }
        }
    }

    async fn get(&self) -> Result<Connection, Error> {
        let conn = self.idle.lock().pop();
        match conn {
            Some(conn) => Ok(conn),
            None => Connection::connect(&self.addr, &self.connect).await,
        }
    }

    fn put(&self, conn: Connection) {
        if conn.is_broken() || self.is_closed() {
            return;
        }

        self.idle.lock().push(conn);
    }

    /// Drop every idle connection and refuse new commands.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.permits.close();
        self.idle.lock().clear();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

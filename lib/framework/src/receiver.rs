use std::time::Duration;

use async_trait::async_trait;
use event::MetricBatch;
use futures::future::BoxFuture;

use crate::pipeline::Pipeline;
use crate::shutdown::ShutdownSignal;

/// A running receiver. Resolves once the receiver exits, `Err` when it
/// could not start.
pub type Receiver = BoxFuture<'static, Result<(), ()>>;

pub struct ReceiverContext {
    /// Component id from the config, for logging
    pub key: String,
    pub output: Pipeline,
    pub shutdown: ShutdownSignal,
}

impl ReceiverContext {
    #[cfg(any(test, feature = "test-util"))]
    pub fn new_test(output: Pipeline, shutdown: ShutdownSignal) -> Self {
        Self {
            key: "test".to_string(),
            output,
            shutdown,
        }
    }
}

/// Registers a receiver type with the host.
pub trait Factory {
    type Config;

    /// The fixed type name of the component, e.g. `redis`
    fn component_type(&self) -> &'static str;

    fn default_config(&self) -> Self::Config;

    /// Validate the config and return the receiver future, nothing is
    /// connected until the future is polled.
    fn create_metrics_receiver(
        &self,
        cx: ReceiverContext,
        config: Self::Config,
    ) -> crate::Result<Receiver>;
}

/// The lifecycle of a pull based receiver.
#[async_trait]
pub trait Scraper: Send {
    /// Connect to the target, an error here is fatal.
    async fn start(&mut self, shutdown: &ShutdownSignal) -> crate::Result<()>;

    /// One full collection cycle.
    async fn scrape(&mut self, shutdown: &ShutdownSignal) -> crate::Result<MetricBatch>;

    async fn shutdown(&mut self) -> crate::Result<()>;
}

/// Drives a `Scraper` on a fixed interval and forwards every batch to
/// the pipeline.
pub struct ScraperController<S> {
    key: String,
    interval: Duration,
    scraper: S,
    output: Pipeline,
    shutdown: ShutdownSignal,
}

impl<S: Scraper> ScraperController<S> {
    pub fn new(cx: ReceiverContext, interval: Duration, scraper: S) -> Self {
        Self {
            key: cx.key,
            interval,
            scraper,
            output: cx.output,
            shutdown: cx.shutdown,
        }
    }

    pub async fn run(mut self) -> Result<(), ()> {
        if let Err(err) = self.scraper.start(&self.shutdown).await {
            error!(
                message = "start receiver failed",
                key = %self.key,
                %err
            );

            return Err(());
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            match self.scraper.scrape(&self.shutdown).await {
                Ok(batch) => {
                    if let Err(err) = self.output.send(batch).await {
                        error!(message = "error sending metrics", key = %self.key, %err);
                        break;
                    }
                }
                Err(err) => {
                    warn!(message = "scrape failed", key = %self.key, %err);
                }
            }
        }

        if let Err(err) = self.scraper.shutdown().await {
            warn!(message = "shutdown receiver failed", key = %self.key, %err);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use event::{Metric, Scope};
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Counting {
        fail_start: bool,
        scrapes: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Scraper for Counting {
        async fn start(&mut self, _shutdown: &ShutdownSignal) -> crate::Result<()> {
            if self.fail_start {
                return Err("connection refused".into());
            }

            Ok(())
        }

        async fn scrape(&mut self, _shutdown: &ShutdownSignal) -> crate::Result<MetricBatch> {
            let n = self.scrapes.fetch_add(1, Ordering::SeqCst);
            let mut batch = MetricBatch::new(Scope::default(), Default::default());
            batch.push(Metric::gauge("scrapes", "", n));

            Ok(batch)
        }

        async fn shutdown(&mut self) -> crate::Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let (output, mut rx) = Pipeline::new_with_buffer(10);
        let (trigger, shutdown) = ShutdownSignal::new();
        let scraper = Counting::default();
        let shutdowns = Arc::clone(&scraper.shutdowns);

        let controller = ScraperController::new(
            ReceiverContext::new_test(output, shutdown),
            Duration::from_secs(10),
            scraper,
        );
        let handle = tokio::spawn(controller.run());

        // the first tick fires immediately
        let first = rx.recv().await.unwrap();
        assert_eq!(first.metrics[0].value.as_f64(), 0.0);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.metrics[0].value.as_f64(), 1.0);

        trigger.trigger();
        assert_eq!(handle.await.unwrap(), Ok(()));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_failure_is_fatal() {
        let (output, mut rx) = Pipeline::new_with_buffer(10);
        let scraper = Counting {
            fail_start: true,
            ..Default::default()
        };
        let scrapes = Arc::clone(&scraper.scrapes);

        let controller = ScraperController::new(
            ReceiverContext::new_test(output, ShutdownSignal::noop()),
            Duration::from_secs(1),
            scraper,
        );

        assert_eq!(controller.run().await, Err(()));
        assert_eq!(scrapes.load(Ordering::SeqCst), 0);
        assert!(rx.recv().await.is_none());
    }
}

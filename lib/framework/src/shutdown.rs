use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Fires the `ShutdownSignal`s created alongside it.
#[derive(Clone, Debug)]
pub struct ShutdownTrigger(CancellationToken);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.cancel();
    }
}

/// Passed to each receiver to coordinate the shutdown process, and threaded
/// through every command a receiver issues so in-flight requests can be
/// abandoned.
///
/// Awaiting the signal resolves once shutdown has begun.
pub struct ShutdownSignal {
    token: CancellationToken,
    wait: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            wait: None,
        }
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let token = &this.token;
        let wait = this
            .wait
            .get_or_insert_with(|| Box::pin(token.clone().cancelled_owned()));

        match wait.as_mut().poll(cx) {
            Poll::Ready(()) => {
                debug!(message = "shutdown signal ready");
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl ShutdownSignal {
    pub fn new() -> (ShutdownTrigger, ShutdownSignal) {
        let token = CancellationToken::new();
        let trigger = ShutdownTrigger(token.clone());

        (trigger, Self { token, wait: None })
    }

    /// A signal that never fires.
    pub fn noop() -> Self {
        Self {
            token: CancellationToken::new(),
            wait: None,
        }
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has begun, without consuming the signal.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn clones_observe_trigger() {
        let (trigger, shutdown) = ShutdownSignal::new();
        let cloned = shutdown.clone();
        assert!(!cloned.is_triggered());

        let handle = tokio::spawn(cloned);
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("shutdown signal should resolve")
            .unwrap();
        assert!(shutdown.is_triggered());

        // a clone made after the trigger resolves immediately
        shutdown.clone().await;
    }

    #[tokio::test(start_paused = true)]
    async fn noop_never_fires() {
        let shutdown = ShutdownSignal::noop();
        let result = tokio::time::timeout(Duration::from_secs(10), shutdown).await;
        assert!(result.is_err());
    }
}

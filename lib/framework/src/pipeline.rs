use event::MetricBatch;
use tokio::sync::mpsc;

const DEFAULT_BUFFER: usize = 64;

#[derive(Debug, thiserror::Error)]
#[error("receiver of the pipeline is closed")]
pub struct ClosedError;

/// The consumer side a receiver hands its batches to.
#[derive(Clone, Debug)]
pub struct Pipeline {
    inner: mpsc::Sender<MetricBatch>,
}

impl Pipeline {
    pub fn new() -> (Self, mpsc::Receiver<MetricBatch>) {
        Self::new_with_buffer(DEFAULT_BUFFER)
    }

    pub fn new_with_buffer(n: usize) -> (Self, mpsc::Receiver<MetricBatch>) {
        let (tx, rx) = mpsc::channel(n);
        (Self { inner: tx }, rx)
    }

    pub async fn send(&mut self, batch: MetricBatch) -> Result<(), ClosedError> {
        self.inner.send(batch).await.map_err(|_| ClosedError)
    }
}

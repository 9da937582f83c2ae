//! Bounded worker pool used by each scheduler phase.
//!
//! `num_workers` tasks pull jobs from one shared channel. Every job runs in
//! its own spawned task so that a panic while resolving one item is caught at
//! the join and cannot take the worker (or the other items) down with it.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Jobs carry their own reply channel; the pool only drives them.
pub struct WorkerPool<J: Send + 'static> {
    job_tx: async_channel::Sender<J>,
    pool_handle: JoinHandle<()>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawn `num_workers` workers (at least one) running `handler` per job.
    /// Jobs received after `cancel` fires are dropped without running.
    pub fn new<F, Fut>(num_workers: usize, cancel: CancellationToken, handler: F) -> Self
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (job_tx, job_rx) = async_channel::unbounded::<J>();
        let handler = Arc::new(handler);

        let pool_handle = tokio::spawn(async move {
            let mut workers = Vec::with_capacity(num_workers.max(1));
            for worker in 0..num_workers.max(1) {
                workers.push(tokio::spawn(worker_loop(
                    worker,
                    job_rx.clone(),
                    handler.clone(),
                    cancel.clone(),
                )));
            }

            // Workers hold the only receivers now
            drop(job_rx);

            for h in workers {
                let _ = h.await;
            }
        });

        Self {
            job_tx,
            pool_handle,
        }
    }

    pub async fn submit(&self, job: J) {
        let _ = self.job_tx.send(job).await;
    }

    /// Close the queue and wait until every submitted job has finished.
    pub async fn shutdown(self) {
        self.job_tx.close();
        let _ = self.pool_handle.await;
    }
}

async fn worker_loop<J, F, Fut>(
    worker: usize,
    rx: async_channel::Receiver<J>,
    handler: Arc<F>,
    cancel: CancellationToken,
) where
    J: Send + 'static,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    while let Ok(job) = rx.recv().await {
        if cancel.is_cancelled() {
            tracing::debug!(worker, "skipping job: cancelled");
            continue;
        }
        if let Err(e) = tokio::spawn(handler(job)).await {
            tracing::error!(worker, error = %e, "item task failed");
        }
    }
}

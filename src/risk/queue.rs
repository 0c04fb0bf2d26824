//! Fire-and-forget execution of risk score computations.
//!
//! [`ComputeQueue::schedule`] is a non-blocking channel send. A single
//! [`ComputeWorker`] drains the channel and runs each computation on its own
//! tokio task, with a semaphore bounding how many run at once. Submitters
//! never observe the outcome; results are written to the cache table by the
//! computation itself.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Hands a claimed key off to background computation.
///
/// Implementations must return immediately and must not surface the
/// computation's outcome to the caller.
pub trait ComputeScheduler: Send + Sync + 'static {
    fn schedule(&self, country_norm: String);
}

/// The computation run for each scheduled key.
pub type ComputeFn = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Submission side of the compute channel. Clone-cheap.
#[derive(Clone)]
pub struct ComputeQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl ComputeScheduler for ComputeQueue {
    fn schedule(&self, country_norm: String) {
        if let Err(e) = self.tx.send(country_norm) {
            // The claim stays `computing` until the next startup sweep.
            error!(
                country_norm = e.0.as_str(),
                "Compute worker is gone, computation dropped"
            );
        }
    }
}

/// Receiving side of the compute channel.
pub struct ComputeWorker {
    rx: mpsc::UnboundedReceiver<String>,
    compute: ComputeFn,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
}

/// Create a connected queue/worker pair running at most `concurrency` computations at once.
pub fn channel(compute: ComputeFn, concurrency: usize) -> (ComputeQueue, ComputeWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let worker = ComputeWorker {
        rx,
        compute,
        permits: Arc::new(Semaphore::new(concurrency.max(1))),
        tasks: JoinSet::new(),
    };
    (ComputeQueue { tx }, worker)
}

impl ComputeWorker {
    /// Run until `shutdown` fires or every [`ComputeQueue`] is dropped.
    ///
    /// On exit, in-flight computations get up to `grace` to finish before
    /// being aborted. Aborted claims are recovered by the next startup sweep.
    pub async fn run(mut self, shutdown: CancellationToken, grace: Duration) {
        info!("Compute worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Compute worker received shutdown signal");
                    break;
                }
                received = self.rx.recv() => match received {
                    Some(country_norm) => self.dispatch(country_norm),
                    None => {
                        debug!("Compute queue closed");
                        break;
                    }
                },
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    reap(result);
                }
            }
        }

        self.rx.close();
        self.drain(grace).await;
        info!("Compute worker stopped");
    }

    fn dispatch(&mut self, country_norm: String) {
        debug!(country_norm = country_norm.as_str(), "Dispatching risk score computation");
        let permits = self.permits.clone();
        let compute = self.compute.clone();
        self.tasks.spawn(async move {
            // The semaphore is never closed, so acquisition only fails if it were.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            compute(country_norm).await;
        });
    }

    async fn drain(&mut self, grace: Duration) {
        if self.tasks.is_empty() {
            return;
        }

        let in_flight = self.tasks.len();
        info!(in_flight, "Waiting for in-flight computations");

        let tasks = &mut self.tasks;
        let finished = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                reap(result);
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "Computations did not finish within the grace period, aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
    }
}

fn reap(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = ?e, "Risk score computation task panicked");
        } else {
            debug!(error = ?e, "Risk score computation task cancelled");
        }
    }
}

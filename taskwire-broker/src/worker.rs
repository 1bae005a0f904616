//! Worker pool: `N` tokio tasks each draining the broker's ready queue and
//! handing jobs to a [`crate::runner::TaskRunner`].
//!
//! Shape grounded in `ferrex-server/src/stream/transcoding/worker.rs`'s
//! `WorkerPool`/`Worker`: one `tokio::task::JoinHandle` plus a dedicated
//! `mpsc` shutdown channel per worker, `tokio::select!` between the shutdown
//! signal and the next unit of work.

use std::sync::Arc;
use std::time::Duration;

use taskwire_core::Store;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::broker::RedisBroker;
use crate::runner::TaskRunner;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    /// How long each `BRPOP` blocks before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// How often the reaper moves due delayed jobs onto the ready list.
    pub reap_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_count: 4,
            poll_timeout: Duration::from_secs(1),
            reap_interval: Duration::from_millis(500),
        }
    }
}

struct Worker {
    #[allow(dead_code)]
    id: usize,
    handle: tokio::task::JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    reaper: Option<Worker>,
}

impl WorkerPool {
    pub fn spawn<S>(config: WorkerConfig, broker: RedisBroker, store: S) -> Self
    where
        S: Store + Clone + Send + Sync + 'static,
    {
        let runner = Arc::new(TaskRunner::new(store, broker.clone()));
        let mut workers = Vec::with_capacity(config.worker_count);

        for id in 0..config.worker_count {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            let broker_clone = broker.clone();
            let runner_clone = runner.clone();
            let poll_timeout = config.poll_timeout;

            let handle = tokio::spawn(async move {
                Self::worker_loop(id, broker_clone, runner_clone, poll_timeout, shutdown_rx).await;
            });

            workers.push(Worker {
                id,
                handle,
                shutdown_tx,
            });
        }

        let (reap_shutdown_tx, reap_shutdown_rx) = mpsc::channel(1);
        let reap_broker = broker.clone();
        let reap_interval = config.reap_interval;
        let reap_handle = tokio::spawn(async move {
            Self::reaper_loop(reap_broker, reap_interval, reap_shutdown_rx).await;
        });

        info!(workers = config.worker_count, "worker pool started");

        WorkerPool {
            workers,
            reaper: Some(Worker {
                id: usize::MAX,
                handle: reap_handle,
                shutdown_tx: reap_shutdown_tx,
            }),
        }
    }

    async fn worker_loop<S>(
        id: usize,
        broker: RedisBroker,
        runner: Arc<TaskRunner<S, RedisBroker>>,
        poll_timeout: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) where
        S: Store + Clone + Send + Sync + 'static,
    {
        info!(worker = id, "worker started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker = id, "worker shutting down");
                    break;
                }
                job = broker.dequeue_ready(poll_timeout) => {
                    match job {
                        Ok(Some(job)) => {
                            runner.run_task(&job.app, &job.queue, job.id).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(worker = id, error = %e, "failed to dequeue ready job");
                        }
                    }
                }
            }
        }
    }

    async fn reaper_loop(broker: RedisBroker, interval: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = broker.reap_due().await {
                        error!(error = %e, "reaper pass failed");
                    }
                }
            }
        }
    }

    pub async fn shutdown(self) {
        info!("shutting down worker pool");
        for worker in &self.workers {
            let _ = worker.shutdown_tx.send(()).await;
        }
        if let Some(reaper) = &self.reaper {
            let _ = reaper.shutdown_tx.send(()).await;
        }
        for worker in self.workers {
            let _ = worker.handle.await;
        }
        if let Some(reaper) = self.reaper {
            let _ = reaper.handle.await;
        }
        info!("worker pool shutdown complete");
    }
}

//! Poll-loop job dispatcher.
//!
//! Every tick claims up to `claim_batch` jobs, bounded by semaphore
//! capacity, and hands each to a supervised task. Dispatch is
//! fire-and-forget: the loop never waits on a job, and a slow step never
//! blocks claiming for the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::WorkerResult;
use crate::executor::{execute_job, ProcessingContext};

pub struct Dispatcher {
    ctx: Arc<ProcessingContext>,
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    worker_id: String,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ProcessingContext>) -> Self {
        let semaphore = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let worker_id = format!("worker-{}", Uuid::new_v4());

        Self {
            ctx,
            semaphore,
            shutdown,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Receiver mirroring this dispatcher's shutdown signal.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal shutdown: stop claiming, cancel in-flight extraction waves.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.ctx.cancel();
    }

    /// Run the poll loop until shutdown, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            worker_id = %self.worker_id,
            max_concurrent = self.ctx.config.max_concurrent_jobs,
            claim_batch = self.ctx.config.claim_batch,
            "Dispatcher started"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.ctx.config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(worker_id = %self.worker_id, "Shutdown signal received");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.claim_wave().await {
                        warn!(worker_id = %self.worker_id, error = %e, "Claim wave failed");
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to drain");
        if tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "Drain timeout elapsed with jobs still in flight; the sweeps will recover them"
            );
        }

        info!(worker_id = %self.worker_id, "Dispatcher stopped");
        Ok(())
    }

    /// Claim and dispatch up to `claim_batch` jobs, stopping early when the
    /// queue is empty or every execution slot is busy.
    async fn claim_wave(&self) -> WorkerResult<()> {
        for _ in 0..self.ctx.config.claim_batch {
            if *self.shutdown.borrow() {
                break;
            }

            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                debug!(worker_id = %self.worker_id, "All execution slots busy");
                break;
            };

            match self
                .ctx
                .store
                .claim(&self.worker_id, self.ctx.config.visibility)
                .await?
            {
                Some(job) => {
                    let ctx = Arc::clone(&self.ctx);
                    let worker_id = self.worker_id.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        execute_job(ctx, job, worker_id).await;
                    });
                }
                None => {
                    drop(permit);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Block until every execution slot is free again.
    async fn wait_for_jobs(&self) {
        loop {
            if self.semaphore.available_permits() == self.ctx.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

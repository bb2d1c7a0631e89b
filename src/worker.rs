//! Consumer loop driving the pipeline
//!
//! One loop per process: poll a bounded batch, run every request in it to a
//! terminal state (concurrently, up to the configured limit), commit the
//! batch, repeat. An empty poll sleeps for the idle backoff. Shutdown stops
//! polling; a batch already in flight always finishes and is committed.
//!
//! Requests for the same product may run concurrently: the repository writes
//! each slot with an atomic per-slot update, so no per-product lock is taken.

use crate::config::WorkerConfig;
use crate::pipeline::{Outcome, Pipeline};
use crate::queue::{Delivery, RequestSource};
use crate::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Counters accumulated over the lifetime of a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub batches: usize,
    pub done: usize,
    pub abandoned: usize,
    pub malformed: usize,
}

enum Handled {
    Done,
    Abandoned,
    Malformed,
}

pub struct Worker {
    source: Arc<dyn RequestSource>,
    pipeline: Pipeline,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        source: Arc<dyn RequestSource>,
        pipeline: Pipeline,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            pipeline,
            config,
            shutdown,
        }
    }

    /// Run until the shutdown signal is raised (or its sender dropped), then
    /// release the consumer connection.
    pub async fn run(mut self) -> Result<WorkerStats> {
        info!(
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            "Starting worker loop"
        );
        let mut stats = WorkerStats::default();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                polled = self
                    .source
                    .poll_batch(self.config.batch_size, self.config.poll_timeout) => polled,
            };

            let batch = match polled {
                Ok(batch) if !batch.is_empty() => batch,
                Ok(_) => {
                    debug!("No requests available");
                    if !self.idle().await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to poll for requests");
                    if !self.idle().await {
                        break;
                    }
                    continue;
                }
            };

            self.process_batch(&batch, &mut stats).await;

            if let Err(e) = self.source.commit(&batch).await {
                // The batch will be redelivered; processing is idempotent.
                error!(error = %e, batch = batch.len(), "Failed to commit batch");
            }
        }

        info!(
            batches = stats.batches,
            done = stats.done,
            abandoned = stats.abandoned,
            malformed = stats.malformed,
            "Worker stopping"
        );
        self.source.close().await?;
        Ok(stats)
    }

    /// Sleep for the idle backoff. Returns `false` if shutdown arrived first.
    async fn idle(&mut self) -> bool {
        tokio::select! {
            changed = self.shutdown.changed() => changed.is_ok() && !*self.shutdown.borrow(),
            _ = tokio::time::sleep(self.config.idle_backoff) => true,
        }
    }

    async fn process_batch(&self, batch: &[Delivery], stats: &mut WorkerStats) {
        debug!(batch = batch.len(), "Processing batch");

        // Boxed as `Send` so `run()` can be spawned (rust-lang/rust#102211).
        let handled: stream::BoxStream<'_, Handled> = stream::iter(batch)
            .map(|delivery| self.handle(delivery))
            .buffer_unordered(self.config.concurrency)
            .boxed();
        let results: Vec<Handled> = handled.collect().await;

        stats.batches += 1;
        for handled in results {
            match handled {
                Handled::Done => stats.done += 1,
                Handled::Abandoned => stats.abandoned += 1,
                Handled::Malformed => stats.malformed += 1,
            }
        }
    }

    async fn handle(&self, delivery: &Delivery) -> Handled {
        let request = match delivery.request() {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    key = ?delivery.key,
                    error = %e,
                    "Skipping malformed processing request"
                );
                return Handled::Malformed;
            }
        };

        match self.pipeline.process(&request).await {
            Outcome::Done { .. } => Handled::Done,
            Outcome::Abandoned { .. } => Handled::Abandoned,
        }
    }
}

//! Per-request ingestion pipeline
//!
//! `Received → Fetching → Compressing → Uploading → Updating → Done`, with any
//! failure that outlives the retry policy ending in `Abandoned`. Every stage is
//! a pure function of `(product_id, image_url)`, so replaying a request
//! rewrites the same object key and the same slot value.

use crate::cache::ProductCache;
use crate::config::RetryConfig;
use crate::dead_letter::{AbandonedRequest, DeadLetterSink};
use crate::image::ImageCodec;
use crate::models::ProcessingRequest;
use crate::repository::ProductRepository;
use crate::storage::{object_key, ObjectStore};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Fetching,
    Compressing,
    Uploading,
    Updating,
    Done,
    Abandoned,
}

impl Stage {
    /// The codec stage an error was raised in.
    fn of_codec_error(error: &Error) -> Self {
        match error {
            Error::Fetch(_) => Stage::Fetching,
            _ => Stage::Compressing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Fetching => "fetching",
            Stage::Compressing => "compressing",
            Stage::Uploading => "uploading",
            Stage::Updating => "updating",
            Stage::Done => "done",
            Stage::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// Terminal state of one request.
#[derive(Debug)]
pub enum Outcome {
    Done {
        compressed_url: String,
        attempts: usize,
    },
    Abandoned {
        stage: Stage,
        error: Error,
        attempts: usize,
    },
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done { .. })
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: Error,
}

impl StageFailure {
    fn new(stage: Stage, error: Error) -> Self {
        Self { stage, error }
    }
}

/// Backoff delays between attempts; yields `max_attempts - 1` values.
pub fn retry_delays(policy: &RetryConfig) -> impl Iterator<Item = Duration> {
    // ExponentialBackoff yields factor * 2^n ms for n = 1, 2, ...
    let factor = (policy.initial_backoff.as_millis() as u64 / 2).max(1);
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(policy.max_backoff)
        .map(jitter)
        .take(policy.max_attempts.saturating_sub(1))
}

/// Drives one request through codec, object store, repository and cache.
///
/// All collaborators are shared handles; the pipeline holds no per-request
/// state and may be used from many tasks at once.
#[derive(Clone)]
pub struct Pipeline {
    codec: Arc<dyn ImageCodec>,
    store: Arc<dyn ObjectStore>,
    repository: Arc<dyn ProductRepository>,
    cache: Arc<dyn ProductCache>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    quality: u8,
    retry: RetryConfig,
}

impl Pipeline {
    pub fn new(
        codec: Arc<dyn ImageCodec>,
        store: Arc<dyn ObjectStore>,
        repository: Arc<dyn ProductRepository>,
        cache: Arc<dyn ProductCache>,
        quality: u8,
        retry: RetryConfig,
    ) -> Self {
        Self {
            codec,
            store,
            repository,
            cache,
            dead_letters: None,
            quality,
            retry,
        }
    }

    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    pub async fn process(&self, request: &ProcessingRequest) -> Outcome {
        let span = tracing::info_span!(
            "ingest",
            product_id = request.product_id,
            image_url = %request.image_url
        );

        self.process_inner(request).instrument(span).await
    }

    async fn process_inner(&self, request: &ProcessingRequest) -> Outcome {
        debug!(stage = %Stage::Received, "Processing request");

        let attempts = AtomicUsize::new(0);
        let result = RetryIf::spawn(
            retry_delays(&self.retry),
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    self.attempt(request).await.map_err(|failure| {
                        warn!(
                            attempt,
                            stage = %failure.stage,
                            error = %failure.error,
                            "Attempt failed"
                        );
                        failure
                    })
                }
            },
            |failure: &StageFailure| failure.error.is_transient(),
        )
        .await;
        let attempts = attempts.load(Ordering::SeqCst);

        match result {
            Ok(compressed_url) => {
                if let Err(e) = self.cache.invalidate(request.product_id).await {
                    warn!(error = %e, "Cache invalidation failed; entry will expire by TTL");
                }
                info!(
                    stage = %Stage::Done,
                    compressed_url = %compressed_url,
                    attempts,
                    "Image processed"
                );
                Outcome::Done {
                    compressed_url,
                    attempts,
                }
            }
            Err(failure) => {
                warn!(
                    stage = %Stage::Abandoned,
                    failed_stage = %failure.stage,
                    error = %failure.error,
                    attempts,
                    "Abandoning request"
                );
                self.record_abandoned(request, &failure, attempts).await;
                Outcome::Abandoned {
                    stage: failure.stage,
                    error: failure.error,
                    attempts,
                }
            }
        }
    }

    async fn attempt(&self, request: &ProcessingRequest) -> Result<String, StageFailure> {
        debug!(stage = %Stage::Fetching, "Fetching and compressing");
        let compressed = self
            .codec
            .fetch_and_compress(&request.image_url, self.quality)
            .await
            .map_err(|e| StageFailure::new(Stage::of_codec_error(&e), e))?;

        let key = object_key(request.product_id, &request.image_url);
        debug!(
            stage = %Stage::Uploading,
            key = %key,
            bytes = compressed.data.len(),
            "Uploading"
        );
        let compressed_url = self
            .store
            .upload(&key, &compressed.data)
            .await
            .map_err(|e| StageFailure::new(Stage::Uploading, e))?;

        debug!(stage = %Stage::Updating, "Updating product slot");
        self.repository
            .set_compressed_image(request.product_id, &request.image_url, &compressed_url)
            .await
            .map_err(|e| StageFailure::new(Stage::Updating, e))?;

        Ok(compressed_url)
    }

    async fn record_abandoned(
        &self,
        request: &ProcessingRequest,
        failure: &StageFailure,
        attempts: usize,
    ) {
        let Some(sink) = &self.dead_letters else {
            return;
        };

        let entry = AbandonedRequest::new(
            request.clone(),
            failure.stage,
            failure.error.to_string(),
            attempts,
        );
        if let Err(e) = sink.record(&entry).await {
            warn!(error = %e, "Failed to record abandoned request");
        }
    }
}

//! Application wiring for the catalog and the ingestion worker.

use crate::cache::{ProductCache, RedisProductCache};
use crate::catalog::ProductCatalog;
use crate::config::{Config, DeadLetterConfig, RetryConfig, WorkerConfig, DEFAULT_IMAGE_QUALITY};
use crate::dead_letter::{DeadLetterSink, JsonlDeadLetterSink, KafkaDeadLetterSink};
use crate::image::{ImageCodec, ImageProcessor};
use crate::pipeline::Pipeline;
use crate::queue::{KafkaPublisher, RequestPublisher, RequestSource};
use crate::repository::{PgProductRepository, ProductRepository};
use crate::storage::{ObjectStore, S3ObjectStore};
use crate::worker::Worker;
use crate::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Shared handles to every external collaborator.
pub struct App {
    services: AppServices,
    settings: AppSettings,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
#[derive(Clone)]
pub struct AppServices {
    pub repository: Arc<dyn ProductRepository>,
    pub cache: Arc<dyn ProductCache>,
    pub publisher: Arc<dyn RequestPublisher>,
    pub codec: Arc<dyn ImageCodec>,
    pub store: Arc<dyn ObjectStore>,
    pub dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

/// Tuning knobs for the worker side.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub image_quality: u8,
    pub retry: RetryConfig,
    pub worker: WorkerConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            image_quality: DEFAULT_IMAGE_QUALITY,
            retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl From<&Config> for AppSettings {
    fn from(config: &Config) -> Self {
        Self {
            image_quality: config.image_quality,
            retry: config.retry.clone(),
            worker: config.worker.clone(),
        }
    }
}

impl App {
    /// Build an app from concrete service dependencies.
    ///
    /// This is primarily useful for integration tests and local harnesses that
    /// need to inject mocks.
    pub fn with_services(services: AppServices, settings: AppSettings) -> Self {
        Self { services, settings }
    }

    /// Connect every production client described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let repository =
            PgProductRepository::connect(&config.database_url, config.database_max_connections)
                .await?;
        let cache = RedisProductCache::connect(&config.redis).await?;
        let publisher = KafkaPublisher::new(&config.kafka.brokers, &config.kafka.topic)?;
        let store = S3ObjectStore::new(&config.storage).await?;
        let codec = ImageProcessor::new(config.http_timeout)?;

        let dead_letters: Option<Arc<dyn DeadLetterSink>> = match &config.dead_letter {
            DeadLetterConfig::Disabled => {
                info!("Dead-letter sink disabled; abandoned requests are only logged");
                None
            }
            DeadLetterConfig::Topic(topic) => {
                info!(topic = %topic, "Recording abandoned requests to Kafka");
                Some(Arc::new(KafkaDeadLetterSink::new(publisher.for_topic(topic))))
            }
            DeadLetterConfig::File(path) => {
                info!(path = %path.display(), "Recording abandoned requests to file");
                Some(Arc::new(JsonlDeadLetterSink::new(path.clone())))
            }
        };

        Ok(Self::with_services(
            AppServices {
                repository: Arc::new(repository),
                cache: Arc::new(cache),
                publisher: Arc::new(publisher),
                codec: Arc::new(codec),
                store: Arc::new(store),
                dead_letters,
            },
            AppSettings::from(config),
        ))
    }

    pub fn catalog(&self) -> ProductCatalog {
        ProductCatalog::new(
            self.services.repository.clone(),
            self.services.cache.clone(),
            self.services.publisher.clone(),
        )
    }

    pub fn pipeline(&self) -> Pipeline {
        let pipeline = Pipeline::new(
            self.services.codec.clone(),
            self.services.store.clone(),
            self.services.repository.clone(),
            self.services.cache.clone(),
            self.settings.image_quality,
            self.settings.retry.clone(),
        );
        match &self.services.dead_letters {
            Some(sink) => pipeline.with_dead_letters(sink.clone()),
            None => pipeline,
        }
    }

    /// A worker consuming from `source` until `shutdown` flips to `true`.
    pub fn worker(
        &self,
        source: Arc<dyn RequestSource>,
        shutdown: watch::Receiver<bool>,
    ) -> Worker {
        Worker::new(source, self.pipeline(), self.settings.worker.clone(), shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::{App, AppServices, AppSettings};
    use crate::cache::MockProductCache;
    use crate::config::RetryConfig;
    use crate::dead_letter::MemoryDeadLetterSink;
    use crate::image::MockImageCodec;
    use crate::models::{NewProduct, ProcessingRequest};
    use crate::pipeline::{Outcome, Stage};
    use crate::queue::MemoryQueue;
    use crate::repository::InMemoryProductRepository;
    use crate::storage::MockObjectStore;
    use std::sync::Arc;
    use std::time::Duration;

    struct TestServices {
        repository: InMemoryProductRepository,
        cache: MockProductCache,
        queue: MemoryQueue,
        store: MockObjectStore,
        dead_letters: MemoryDeadLetterSink,
    }

    fn build_test_app(codec: MockImageCodec) -> (App, TestServices) {
        let test = TestServices {
            repository: InMemoryProductRepository::new(),
            cache: MockProductCache::new(),
            queue: MemoryQueue::new(),
            store: MockObjectStore::new(),
            dead_letters: MemoryDeadLetterSink::new(),
        };

        let app = App::with_services(
            AppServices {
                repository: Arc::new(test.repository.clone()),
                cache: Arc::new(test.cache.clone()),
                publisher: Arc::new(test.queue.clone()),
                codec: Arc::new(codec),
                store: Arc::new(test.store.clone()),
                dead_letters: Some(Arc::new(test.dead_letters.clone())),
            },
            AppSettings {
                retry: RetryConfig {
                    max_attempts: 2,
                    initial_backoff: Duration::from_millis(1),
                    max_backoff: Duration::from_millis(2),
                },
                ..Default::default()
            },
        );
        (app, test)
    }

    #[tokio::test]
    async fn test_catalog_and_pipeline_share_services() {
        let (app, test) = build_test_app(MockImageCodec::new());

        let created = app
            .catalog()
            .create_product(NewProduct {
                owner_id: 1,
                name: "Mug".to_string(),
                description: String::new(),
                source_images: vec!["http://x/mug.jpg".to_string()],
                price: 9.0,
            })
            .await
            .unwrap();
        let request = test.queue.get_published().remove(0);

        // Warm the cache so the pipeline has something to invalidate.
        app.catalog().get_product(created.product.id).await.unwrap();
        let outcome = app.pipeline().process(&request).await;

        assert!(outcome.is_done());
        assert_eq!(test.store.get_upload_count(), 1);
        assert_eq!(test.repository.get_update_count(), 1);
        assert_eq!(test.cache.get_invalidate_count(), 1);

        let fresh = app.catalog().get_product(created.product.id).await.unwrap();
        assert_eq!(
            fresh.compressed_images[0],
            format!(
                "https://mock-bucket.s3.amazonaws.com/compressed/{}_mug.jpg",
                created.product.id
            )
        );
    }

    #[tokio::test]
    async fn test_pipeline_uses_configured_dead_letter_sink() {
        let (app, test) = build_test_app(MockImageCodec::new().with_failure(true));

        let outcome = app
            .pipeline()
            .process(&ProcessingRequest::new(5, "http://x/a.jpg".to_string()))
            .await;

        assert!(matches!(
            outcome,
            Outcome::Abandoned {
                stage: Stage::Compressing,
                ..
            }
        ));
        let entries = test.dead_letters.get_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].request.product_id, 5);
    }

    #[test]
    fn test_default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.image_quality, 75);
        assert_eq!(settings.retry.max_attempts, 3);
    }
}

use futures::future::join_all;
use image::{ImageFormat, RgbImage};
use image_ingest::{
    app::{App, AppServices, AppSettings},
    cache::{MockProductCache, ProductCache},
    config::{RetryConfig, WorkerConfig},
    dead_letter::{JsonlDeadLetterSink, MemoryDeadLetterSink},
    image::{ImageCodec, ImageProcessor, MockImageCodec},
    models::{NewProduct, ProcessingRequest},
    pipeline::{Outcome, Stage},
    queue::MemoryQueue,
    repository::{InMemoryProductRepository, ProductRepository},
    storage::MockObjectStore,
    Error,
};
use pretty_assertions::assert_eq;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    app: App,
    repository: InMemoryProductRepository,
    cache: MockProductCache,
    queue: MemoryQueue,
    store: MockObjectStore,
    dead_letters: MemoryDeadLetterSink,
}

fn fast_retry(max_attempts: usize) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

fn harness_with(codec: Arc<dyn ImageCodec>, retry: RetryConfig) -> Harness {
    harness_with_repository(codec, retry, InMemoryProductRepository::new())
}

fn harness_with_repository(
    codec: Arc<dyn ImageCodec>,
    retry: RetryConfig,
    repository: InMemoryProductRepository,
) -> Harness {
    let cache = MockProductCache::new();
    let queue = MemoryQueue::new();
    let store = MockObjectStore::new();
    let dead_letters = MemoryDeadLetterSink::new();

    let app = App::with_services(
        AppServices {
            repository: Arc::new(repository.clone()),
            cache: Arc::new(cache.clone()),
            publisher: Arc::new(queue.clone()),
            codec,
            store: Arc::new(store.clone()),
            dead_letters: Some(Arc::new(dead_letters.clone())),
        },
        AppSettings {
            image_quality: 75,
            retry,
            worker: WorkerConfig {
                poll_timeout: Duration::from_millis(20),
                idle_backoff: Duration::from_millis(5),
                batch_size: 8,
                concurrency: 4,
            },
        },
    );

    Harness {
        app,
        repository,
        cache,
        queue,
        store,
        dead_letters,
    }
}

fn harness(codec: MockImageCodec) -> Harness {
    harness_with(Arc::new(codec), fast_retry(3))
}

fn new_product(images: &[&str]) -> NewProduct {
    NewProduct {
        owner_id: 42,
        name: "Lamp".to_string(),
        description: "Brass desk lamp".to_string(),
        source_images: images.iter().map(|s| s.to_string()).collect(),
        price: 49.99,
    }
}

fn expected_url(product_id: i64, basename: &str) -> String {
    format!(
        "https://mock-bucket.s3.amazonaws.com/compressed/{}_{}",
        product_id, basename
    )
}

/// Run a worker against the harness queue until `expected` offsets are committed.
async fn drain_queue(harness: &Harness, expected: usize) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = harness
        .app
        .worker(Arc::new(harness.queue.clone()), shutdown_rx);
    let handle = tokio::spawn(worker.run());

    for _ in 0..300 {
        if harness.queue.get_committed().len() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();
    assert_ok!(handle.await.unwrap());
    assert_eq!(harness.queue.get_committed().len(), expected);
}

fn sample_jpeg() -> Vec<u8> {
    let img = RgbImage::from_fn(48, 32, |x, y| image::Rgb([(x * 5) as u8, (y * 7) as u8, 90]));
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Jpeg).unwrap();
    buffer.into_inner()
}

#[tokio::test]
async fn test_create_publish_process_read() {
    let h = harness(MockImageCodec::new());

    let created = assert_ok!(
        h.app
            .catalog()
            .create_product(new_product(&["http://x/a.jpg"]))
            .await
    );
    let id = created.product.id;
    assert_eq!(
        h.queue.get_published(),
        vec![ProcessingRequest::new(id, "http://x/a.jpg".to_string())]
    );

    // Slots read back empty until the worker gets to them.
    let before = assert_ok!(h.app.catalog().get_product(id).await);
    assert_eq!(before.compressed_images, vec![String::new()]);

    drain_queue(&h, 1).await;

    let after = assert_ok!(h.app.catalog().get_product(id).await);
    assert_eq!(after.compressed_images, vec![expected_url(id, "a.jpg")]);
    assert!(h.store.get_object(&format!("compressed/{}_a.jpg", id)).is_some());
}

#[tokio::test]
async fn test_cache_miss_then_hit() {
    let h = harness(MockImageCodec::new());
    let id = h.repository.create(new_product(&[])).await.unwrap().id;

    let first = assert_ok!(h.app.catalog().get_product(id).await);
    let second = assert_ok!(h.app.catalog().get_product(id).await);

    assert_eq!(first, second);
    assert_eq!(h.repository.get_get_count(), 1);
    assert_eq!(h.cache.get_set_count(), 1);
}

#[tokio::test]
async fn test_no_stale_read_after_processing() {
    let h = harness(MockImageCodec::new());
    let id = h
        .repository
        .create(new_product(&["http://x/a.jpg"]))
        .await
        .unwrap()
        .id;

    let cached = assert_ok!(h.app.catalog().get_product(id).await);
    assert_eq!(cached.compressed_images[0], "");
    assert!(assert_ok!(h.cache.get(id).await).hit().is_some());

    let outcome = h
        .app
        .pipeline()
        .process(&ProcessingRequest::new(id, "http://x/a.jpg".to_string()))
        .await;
    assert!(outcome.is_done());
    assert!(assert_ok!(h.cache.get(id).await).hit().is_none());

    let fresh = assert_ok!(h.app.catalog().get_product(id).await);
    assert_eq!(fresh.compressed_images[0], expected_url(id, "a.jpg"));
}

#[tokio::test]
async fn test_read_overlapping_processing_is_not_cached() {
    let h = harness_with_repository(
        Arc::new(MockImageCodec::new()),
        fast_retry(3),
        InMemoryProductRepository::new().with_read_delay(Duration::from_millis(150)),
    );
    let id = h
        .repository
        .create(new_product(&["http://x/a.jpg"]))
        .await
        .unwrap()
        .id;

    // Misses, snapshots the empty slot, then sleeps inside the repository read.
    let catalog = h.app.catalog();
    let reader = tokio::spawn(async move { catalog.get_product(id).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    let outcome = h
        .app
        .pipeline()
        .process(&ProcessingRequest::new(id, "http://x/a.jpg".to_string()))
        .await;
    assert!(outcome.is_done());

    let stale = assert_ok!(reader.await.unwrap());
    assert_eq!(stale.compressed_images, vec![String::new()]);
    assert!(assert_ok!(h.cache.get(id).await).hit().is_none());

    let fresh = assert_ok!(h.app.catalog().get_product(id).await);
    assert_eq!(fresh.compressed_images, vec![expected_url(id, "a.jpg")]);
}

#[tokio::test]
async fn test_concurrent_slots_are_all_persisted() {
    let h = harness(MockImageCodec::new().with_delay(Duration::from_millis(5)));
    let images: Vec<String> = (0..12).map(|i| format!("http://x/img{}.jpg", i)).collect();
    let refs: Vec<&str> = images.iter().map(String::as_str).collect();
    let id = h.repository.create(new_product(&refs)).await.unwrap().id;

    let pipeline = h.app.pipeline();
    let requests: Vec<ProcessingRequest> = images
        .iter()
        .map(|url| ProcessingRequest::new(id, url.clone()))
        .collect();
    let outcomes = join_all(requests.iter().map(|request| pipeline.process(request))).await;

    assert!(outcomes.iter().all(Outcome::is_done));
    let stored = h.repository.snapshot(id).unwrap();
    let expected: Vec<String> = (0..12)
        .map(|i| expected_url(id, &format!("img{}.jpg", i)))
        .collect();
    assert_eq!(stored.compressed_images, expected);
}

#[tokio::test]
async fn test_duplicate_delivery_is_idempotent() {
    let h = harness(MockImageCodec::new());
    let id = h
        .repository
        .create(new_product(&["http://x/a.jpg", "http://x/b.png"]))
        .await
        .unwrap()
        .id;
    let request = ProcessingRequest::new(id, "http://x/b.png".to_string());

    assert!(h.app.pipeline().process(&request).await.is_done());
    let once = h.repository.snapshot(id).unwrap();
    assert!(h.app.pipeline().process(&request).await.is_done());
    let twice = h.repository.snapshot(id).unwrap();

    assert_eq!(once, twice);
    assert_eq!(twice.compressed_images[0], "");
    assert_eq!(h.store.get_keys(), vec![format!("compressed/{}_b.png", id)]);
}

#[tokio::test]
async fn test_transient_failures_retried_then_done() {
    let codec = MockImageCodec::new().with_transient_failures(2);
    let h = harness(codec.clone());
    let id = h
        .repository
        .create(new_product(&["http://x/a.jpg"]))
        .await
        .unwrap()
        .id;

    let outcome = h
        .app
        .pipeline()
        .process(&ProcessingRequest::new(id, "http://x/a.jpg".to_string()))
        .await;

    match outcome {
        Outcome::Done { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected Done, got {:?}", other),
    }
    assert_eq!(codec.get_call_count(), 3);
    assert!(h.dead_letters.get_entries().is_empty());
}

#[tokio::test]
async fn test_unknown_product_is_abandoned() {
    let h = harness(MockImageCodec::new());
    let request = ProcessingRequest::new(999, "http://x/a.jpg".to_string());

    let outcome = h.app.pipeline().process(&request).await;

    match outcome {
        Outcome::Abandoned {
            stage,
            error,
            attempts,
        } => {
            assert_eq!(stage, Stage::Updating);
            assert!(matches!(error, Error::NotFound(999)));
            assert_eq!(attempts, 1);
        }
        other => panic!("expected Abandoned, got {:?}", other),
    }
    let entries = h.dead_letters.get_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request, request);
    assert_eq!(entries[0].stage, Stage::Updating);
}

#[tokio::test]
async fn test_worker_skips_malformed_messages() {
    let h = harness(MockImageCodec::new());
    let created = h
        .app
        .catalog()
        .create_product(new_product(&["http://x/a.jpg"]))
        .await
        .unwrap();
    h.queue
        .push_raw(Some("1".to_string()), br#"{"product_id":"oops"}"#.to_vec());

    drain_queue(&h, 2).await;

    let stored = h.repository.snapshot(created.product.id).unwrap();
    assert_eq!(
        stored.compressed_images,
        vec![expected_url(created.product.id, "a.jpg")]
    );
}

#[tokio::test]
async fn test_real_codec_against_http_server() {
    let server = MockServer::start().await;
    let jpeg = sample_jpeg();
    Mock::given(method("GET"))
        .and(path("/photos/chair.jpg"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(jpeg.clone())
                .insert_header("content-type", "image/jpeg"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/photos/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let codec = ImageProcessor::new(Duration::from_secs(5)).unwrap();
    let h = harness_with(Arc::new(codec), fast_retry(1));
    let good = format!("{}/photos/chair.jpg", server.uri());
    let missing = format!("{}/photos/missing.jpg", server.uri());
    let id = h
        .repository
        .create(new_product(&[good.as_str(), missing.as_str()]))
        .await
        .unwrap()
        .id;

    let outcome = h
        .app
        .pipeline()
        .process(&ProcessingRequest::new(id, good.clone()))
        .await;
    assert!(outcome.is_done());

    let stored = h
        .store
        .get_object(&format!("compressed/{}_chair.jpg", id))
        .unwrap();
    assert_eq!(stored.content_type, "image/jpeg");
    let decoded = assert_ok!(image::load_from_memory(&stored.data));
    assert_eq!((decoded.width(), decoded.height()), (48, 32));

    let outcome = h
        .app
        .pipeline()
        .process(&ProcessingRequest::new(id, missing))
        .await;
    assert!(matches!(
        outcome,
        Outcome::Abandoned {
            stage: Stage::Fetching,
            ..
        }
    ));

    let product = h.repository.snapshot(id).unwrap();
    assert_eq!(product.compressed_images[0], expected_url(id, "chair.jpg"));
    assert_eq!(product.compressed_images[1], "");
}

#[tokio::test]
async fn test_jsonl_dead_letter_sink_records_abandoned() {
    let dir = tempfile::tempdir().unwrap();
    let dead_letter_path = dir.path().join("dead").join("abandoned.jsonl");

    let repository = InMemoryProductRepository::new();
    let app = App::with_services(
        AppServices {
            repository: Arc::new(repository.clone()),
            cache: Arc::new(MockProductCache::new()),
            publisher: Arc::new(MemoryQueue::new()),
            codec: Arc::new(MockImageCodec::new().with_failure(true)),
            store: Arc::new(MockObjectStore::new()),
            dead_letters: Some(Arc::new(JsonlDeadLetterSink::new(&dead_letter_path))),
        },
        AppSettings {
            retry: fast_retry(3),
            ..Default::default()
        },
    );
    let id = repository
        .create(new_product(&["http://x/corrupt.jpg"]))
        .await
        .unwrap()
        .id;

    let outcome = app
        .pipeline()
        .process(&ProcessingRequest::new(id, "http://x/corrupt.jpg".to_string()))
        .await;
    assert!(!outcome.is_done());

    let entries = assert_ok!(JsonlDeadLetterSink::read_all(&dead_letter_path).await);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request.product_id, id);
    assert_eq!(entries[0].stage, Stage::Compressing);
    assert_eq!(entries[0].attempts, 1);

    assert_eq!(
        assert_ok!(JsonlDeadLetterSink::read_all(Path::new("/nonexistent/dead.jsonl")).await),
        Vec::new()
    );
}

#[tokio::test]
async fn test_unknown_product_read_fails() {
    let h = harness(MockImageCodec::new());
    let err = assert_err!(h.app.catalog().get_product(12345).await);
    assert_eq!(err.to_string(), "Product 12345 not found");
}

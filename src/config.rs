//! Startup configuration
//!
//! Everything the pipeline needs is read once from the environment (after
//! loading `.env`). Missing required values fail process start.

use crate::{Error, Result};
use redis::IntoConnectionInfo;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_IMAGE_QUALITY: u8 = 75;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_PUBLIC_DOMAIN: &str = "s3.amazonaws.com";

/// librdkafka's default `max.poll.interval.ms`, kept as the lower bound.
pub const MIN_MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);
/// Upper bound librdkafka accepts for `max.poll.interval.ms`.
pub const MAX_MAX_POLL_INTERVAL: Duration = Duration::from_millis(86_400_000);
const POLL_INTERVAL_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub kafka: KafkaConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub dead_letter: DeadLetterConfig,
    pub image_quality: u8,
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    /// Longest gap between polls before the broker evicts the consumer.
    pub max_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub addr: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ttl: Duration,
}

impl RedisConfig {
    /// Connection settings for `redis::Client::open`.
    ///
    /// Credentials are set on the parsed address rather than spliced into
    /// the URL, so they may contain any character.
    pub fn connection_info(&self) -> Result<redis::ConnectionInfo> {
        let addr = if self.addr.contains("://") {
            self.addr.clone()
        } else {
            format!("redis://{}", self.addr)
        };
        let mut info = addr
            .as_str()
            .into_connection_info()
            .map_err(|e| Error::Config(format!("Invalid REDIS_ADDR '{}': {}", self.addr, e)))?;

        if let Some(username) = &self.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            info.redis.password = Some(password.clone());
        }
        Ok(info)
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub public_domain: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_timeout: Duration,
    pub idle_backoff: Duration,
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            idle_backoff: Duration::from_millis(1000),
            batch_size: 16,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Worst-case wall time of one request: every attempt runs the fetch and
    /// the upload to their timeout, with the longest backoff between them.
    pub fn worst_case(&self, http_timeout: Duration) -> Duration {
        let attempts = self.max_attempts.max(1) as u32;
        http_timeout
            .saturating_mul(2)
            .saturating_mul(attempts)
            .saturating_add(self.max_backoff.saturating_mul(attempts - 1))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeadLetterConfig {
    Disabled,
    Topic(String),
    File(PathBuf),
}

/// Poll interval that outlasts a full batch at the worst-case request time.
///
/// A batch runs in `ceil(batch_size / concurrency)` waves and the worker does
/// not poll until the batch is committed.
pub fn max_poll_interval_for(
    worker: &WorkerConfig,
    retry: &RetryConfig,
    http_timeout: Duration,
) -> Result<Duration> {
    let concurrency = worker.concurrency.max(1);
    let waves = ((worker.batch_size.max(1) + concurrency - 1) / concurrency) as u32;
    let estimate = retry
        .worst_case(http_timeout)
        .saturating_mul(waves)
        .saturating_add(POLL_INTERVAL_MARGIN)
        .max(MIN_MAX_POLL_INTERVAL);

    if estimate > MAX_MAX_POLL_INTERVAL {
        return Err(Error::Config(format!(
            "A batch of {} with {} workers may run {}s between polls, more than Kafka allows; \
             lower BATCH_SIZE, RETRY_MAX_ATTEMPTS or HTTP_TIMEOUT_SECS",
            worker.batch_size,
            worker.concurrency,
            estimate.as_secs()
        )));
    }
    Ok(estimate)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required =
            |key: &str| var(key).ok_or_else(|| Error::Config(format!("{} not set", key)));

        let worker_defaults = WorkerConfig::default();
        let retry_defaults = RetryConfig::default();

        let dead_letter = match (var("DEAD_LETTER_TOPIC"), var("DEAD_LETTER_PATH")) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "DEAD_LETTER_TOPIC and DEAD_LETTER_PATH are mutually exclusive".to_string(),
                ))
            }
            (Some(topic), None) => DeadLetterConfig::Topic(topic),
            (None, Some(path)) => DeadLetterConfig::File(PathBuf::from(path)),
            (None, None) => DeadLetterConfig::Disabled,
        };

        let access_key_id = var("S3_ACCESS_KEY_ID");
        let secret_access_key = var("S3_SECRET_ACCESS_KEY");
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(Error::Config(
                "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together".to_string(),
            ));
        }

        let retry = RetryConfig {
            max_attempts: parse_or(&var, "RETRY_MAX_ATTEMPTS", retry_defaults.max_attempts)?,
            initial_backoff: Duration::from_millis(parse_or(
                &var,
                "RETRY_INITIAL_BACKOFF_MS",
                retry_defaults.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_or(
                &var,
                "RETRY_MAX_BACKOFF_MS",
                retry_defaults.max_backoff.as_millis() as u64,
            )?),
        };
        if retry.max_attempts == 0 {
            return Err(Error::Config(
                "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let worker = WorkerConfig {
            poll_timeout: Duration::from_millis(parse_or(
                &var,
                "POLL_TIMEOUT_MS",
                worker_defaults.poll_timeout.as_millis() as u64,
            )?),
            idle_backoff: Duration::from_millis(parse_or(
                &var,
                "IDLE_BACKOFF_MS",
                worker_defaults.idle_backoff.as_millis() as u64,
            )?),
            batch_size: parse_or(&var, "BATCH_SIZE", worker_defaults.batch_size)?.max(1),
            concurrency: parse_or(&var, "WORKER_CONCURRENCY", worker_defaults.concurrency)?.max(1),
        };

        let http_timeout = Duration::from_secs(parse_or(&var, "HTTP_TIMEOUT_SECS", 30)?);
        let max_poll_interval = max_poll_interval_for(&worker, &retry, http_timeout)?;

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(&var, "DATABASE_MAX_CONNECTIONS", 5)?,
            kafka: KafkaConfig {
                brokers: required("KAFKA_BROKERS")?,
                topic: required("KAFKA_TOPIC")?,
                group_id: required("KAFKA_GROUP_ID")?,
                max_poll_interval,
            },
            redis: RedisConfig {
                addr: required("REDIS_ADDR")?,
                username: var("REDIS_USERNAME"),
                password: var("REDIS_PASSWORD"),
                ttl: Duration::from_secs(parse_or(
                    &var,
                    "CACHE_TTL_SECS",
                    DEFAULT_CACHE_TTL_SECS,
                )?),
            },
            storage: StorageConfig {
                bucket: required("S3_BUCKET")?,
                region: required("S3_REGION")?,
                endpoint: var("S3_ENDPOINT"),
                access_key_id,
                secret_access_key,
                public_domain: var("S3_PUBLIC_DOMAIN")
                    .unwrap_or_else(|| DEFAULT_PUBLIC_DOMAIN.to_string()),
            },
            worker,
            retry,
            dead_letter,
            image_quality: parse_or(&var, "IMAGE_QUALITY", DEFAULT_IMAGE_QUALITY)?.clamp(1, 100),
            http_timeout,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}

use super::{cache_key, generation_key, CacheLookup, FillToken, ProductCache};
use crate::config::RedisConfig;
use crate::models::Product;
use crate::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Writes the snapshot only while the generation key still holds the value
/// observed on the miss. A missing generation key counts as `0`.
const GUARDED_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[2])
if (current or '0') ~= ARGV[2] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
return 1
"#;

/// Redis-backed product cache.
///
/// `ConnectionManager` multiplexes one connection and reconnects on failure;
/// clones share it, so every call works on its own handle.
#[derive(Clone)]
pub struct RedisProductCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisProductCache {
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.connection_info()?)
            .map_err(|e| Error::Config(format!("Invalid Redis address: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Cache(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(addr = %config.addr, ttl_secs = config.ttl.as_secs(), "Connected to Redis");
        Ok(Self::with_manager(manager, config.ttl))
    }

    pub fn with_manager(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl ProductCache for RedisProductCache {
    async fn get(&self, product_id: i64) -> Result<CacheLookup> {
        let mut conn = self.conn.clone();
        let (value, generation): (Option<String>, Option<u64>) = redis::cmd("MGET")
            .arg(cache_key(product_id))
            .arg(generation_key(product_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Failed to read from cache: {}", e)))?;

        match value {
            Some(raw) => {
                let product = serde_json::from_str(&raw).map_err(|e| {
                    Error::Cache(format!("Failed to deserialize cache value: {}", e))
                })?;
                Ok(CacheLookup::Hit(product))
            }
            None => Ok(CacheLookup::Miss(FillToken(generation.unwrap_or(0)))),
        }
    }

    async fn set(&self, product: &Product, token: FillToken) -> Result<bool> {
        let payload = serde_json::to_string(product)?;

        let mut conn = self.conn.clone();
        let stored: i64 = redis::Script::new(GUARDED_SET_SCRIPT)
            .key(cache_key(product.id))
            .key(generation_key(product.id))
            .arg(payload)
            .arg(token.0.to_string())
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Failed to write to cache: {}", e)))?;
        Ok(stored == 1)
    }

    async fn invalidate(&self, product_id: i64) -> Result<()> {
        // The generation outlives any snapshot written under the old value.
        let generation_ttl = (self.ttl_secs() * 2) as i64;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .incr(generation_key(product_id), 1)
            .ignore()
            .expire(generation_key(product_id), generation_ttl)
            .ignore()
            .del(cache_key(product_id))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| Error::Cache(format!("Failed to invalidate cache key: {}", e)))
    }
}

use super::{cache_key, CacheLookup, FillToken, ProductCache};
use crate::models::Product;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// In-memory cache storing serialized snapshots with a TTL.
#[derive(Clone)]
pub struct MockProductCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    generations: Arc<Mutex<HashMap<i64, u64>>>,
    ttl: Duration,
    get_count: Arc<Mutex<usize>>,
    set_count: Arc<Mutex<usize>>,
    invalidate_count: Arc<Mutex<usize>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockProductCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::from_secs(3600),
            get_count: Arc::new(Mutex::new(0)),
            set_count: Arc::new(Mutex::new(0)),
            invalidate_count: Arc::new(Mutex::new(0)),
            should_fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Toggle simulated transport failures on every operation.
    pub fn set_failure(&self, should_fail: bool) {
        *self.should_fail.lock().unwrap() = should_fail;
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        self.set_failure(should_fail);
        self
    }

    pub fn get_get_count(&self) -> usize {
        *self.get_count.lock().unwrap()
    }

    pub fn get_set_count(&self) -> usize {
        *self.set_count.lock().unwrap()
    }

    pub fn get_invalidate_count(&self) -> usize {
        *self.invalidate_count.lock().unwrap()
    }

    /// Raw cached payload for a key, ignoring expiry.
    pub fn raw_entry(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .map(|(payload, _)| payload.clone())
    }

    pub fn generation(&self, product_id: i64) -> u64 {
        self.generations
            .lock()
            .unwrap()
            .get(&product_id)
            .copied()
            .unwrap_or(0)
    }

    fn check_failure(&self) -> Result<()> {
        if *self.should_fail.lock().unwrap() {
            return Err(Error::Cache("Mock cache unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MockProductCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProductCache for MockProductCache {
    async fn get(&self, product_id: i64) -> Result<CacheLookup> {
        *self.get_count.lock().unwrap() += 1;
        self.check_failure()?;

        let key = cache_key(product_id);
        let miss = CacheLookup::Miss(FillToken(self.generation(product_id)));
        let mut entries = self.entries.lock().unwrap();
        let expired = matches!(
            entries.get(&key),
            Some((_, expires_at)) if *expires_at <= Instant::now()
        );
        if expired {
            entries.remove(&key);
            return Ok(miss);
        }

        match entries.get(&key) {
            Some((payload, _)) => Ok(CacheLookup::Hit(serde_json::from_str(payload)?)),
            None => Ok(miss),
        }
    }

    async fn set(&self, product: &Product, token: FillToken) -> Result<bool> {
        *self.set_count.lock().unwrap() += 1;
        self.check_failure()?;

        let generations = self.generations.lock().unwrap();
        if generations.get(&product.id).copied().unwrap_or(0) != token.0 {
            return Ok(false);
        }

        let payload = serde_json::to_string(product)?;
        self.entries
            .lock()
            .unwrap()
            .insert(cache_key(product.id), (payload, Instant::now() + self.ttl));
        Ok(true)
    }

    async fn invalidate(&self, product_id: i64) -> Result<()> {
        *self.invalidate_count.lock().unwrap() += 1;
        self.check_failure()?;

        let mut generations = self.generations.lock().unwrap();
        *generations.entry(product_id).or_insert(0) += 1;
        self.entries.lock().unwrap().remove(&cache_key(product_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(id: i64) -> Product {
        Product {
            id,
            owner_id: 1,
            name: "Chair".to_string(),
            description: String::new(),
            source_images: vec!["http://x/a.jpg".to_string()],
            compressed_images: vec![String::new()],
            price: 10.0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_set_get_invalidate() {
        let cache = MockProductCache::new();

        let stored = product(5);

        assert_eq!(cache.get(5).await.unwrap(), CacheLookup::Miss(FillToken(0)));
        assert!(cache.set(&stored, FillToken(0)).await.unwrap());
        assert_eq!(cache.get(5).await.unwrap(), CacheLookup::Hit(stored));
        assert!(cache.raw_entry("product:5").is_some());

        cache.invalidate(5).await.unwrap();
        assert_eq!(cache.get(5).await.unwrap(), CacheLookup::Miss(FillToken(1)));
        assert_eq!(cache.get_set_count(), 1);
        assert_eq!(cache.get_invalidate_count(), 1);
    }

    #[tokio::test]
    async fn test_fill_after_invalidate_is_rejected() {
        let cache = MockProductCache::new();

        let token = match cache.get(7).await.unwrap() {
            CacheLookup::Miss(token) => token,
            CacheLookup::Hit(_) => panic!("empty cache returned a hit"),
        };
        cache.invalidate(7).await.unwrap();

        assert!(!cache.set(&product(7), token).await.unwrap());
        assert!(cache.raw_entry("product:7").is_none());
        assert_eq!(cache.generation(7), 1);

        assert!(cache.set(&product(7), FillToken(1)).await.unwrap());
        assert!(cache.get(7).await.unwrap().hit().is_some());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = MockProductCache::new().with_ttl(Duration::from_millis(20));
        cache.set(&product(1), FillToken(0)).await.unwrap();

        assert!(cache.get(1).await.unwrap().hit().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(1).await.unwrap().hit().is_none());
    }

    #[tokio::test]
    async fn test_failure_mode() {
        let cache = MockProductCache::new().with_failure(true);

        assert!(matches!(cache.get(1).await, Err(Error::Cache(_))));
        assert!(cache.set(&product(1), FillToken(0)).await.is_err());
        assert!(cache.invalidate(1).await.is_err());

        cache.set_failure(false);
        assert!(cache.get(1).await.unwrap().hit().is_none());
    }
}

//! Read-through cache for product records
//!
//! Entries are JSON snapshots keyed by `product:<id>` and expire after a fixed
//! TTL. The cache is never authoritative; callers treat errors as misses.
//!
//! Every product also has a generation counter under `product:<id>:gen`.
//! `invalidate` bumps it; a miss hands out the generation it observed and a
//! later `set` only lands while the counter still has that value. A reader
//! that loaded a snapshot before an update therefore cannot re-populate the
//! cache with it after the update's invalidation.

pub mod client;
pub mod mock;

pub use client::RedisProductCache;
pub use mock::MockProductCache;

use crate::models::Product;
use crate::Result;
use async_trait::async_trait;

pub const CACHE_KEY_PREFIX: &str = "product:";

pub fn cache_key(product_id: i64) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, product_id)
}

pub fn generation_key(product_id: i64) -> String {
    format!("{}{}:gen", CACHE_KEY_PREFIX, product_id)
}

/// Generation observed on a miss, required to populate the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(Product),
    Miss(FillToken),
}

impl CacheLookup {
    pub fn hit(self) -> Option<Product> {
        match self {
            CacheLookup::Hit(product) => Some(product),
            CacheLookup::Miss(_) => None,
        }
    }
}

#[async_trait]
pub trait ProductCache: Send + Sync {
    async fn get(&self, product_id: i64) -> Result<CacheLookup>;

    /// Store `product` unless the entry was invalidated after `token` was
    /// issued. Returns whether the snapshot was stored.
    async fn set(&self, product: &Product, token: FillToken) -> Result<bool>;

    /// Drop the entry and advance its generation.
    async fn invalidate(&self, product_id: i64) -> Result<()>;
}

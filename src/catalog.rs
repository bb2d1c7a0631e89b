//! Product catalog: record creation and cached reads
//!
//! Creating a product persists the record with empty compressed slots and
//! then announces one processing request per source image. Reads go through
//! the cache; the cache is never authoritative and any failure there falls
//! back to the repository. A miss only re-populates the cache when no
//! invalidation happened between the miss and the repository read.

use crate::cache::{CacheLookup, ProductCache};
use crate::models::{NewProduct, ProcessingRequest, Product, ProductFilter};
use crate::queue::RequestPublisher;
use crate::repository::ProductRepository;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of `create_product`.
///
/// The record is already durable when this is returned. `publish_errors`
/// lists requests that could not be announced; those slots stay empty until
/// the request is published again.
#[derive(Debug)]
pub struct CreatedProduct {
    pub product: Product,
    pub publish_errors: Vec<(ProcessingRequest, Error)>,
}

impl CreatedProduct {
    pub fn fully_published(&self) -> bool {
        self.publish_errors.is_empty()
    }
}

#[derive(Clone)]
pub struct ProductCatalog {
    repository: Arc<dyn ProductRepository>,
    cache: Arc<dyn ProductCache>,
    publisher: Arc<dyn RequestPublisher>,
}

impl ProductCatalog {
    pub fn new(
        repository: Arc<dyn ProductRepository>,
        cache: Arc<dyn ProductCache>,
        publisher: Arc<dyn RequestPublisher>,
    ) -> Self {
        Self {
            repository,
            cache,
            publisher,
        }
    }

    pub async fn create_product(&self, new_product: NewProduct) -> Result<CreatedProduct> {
        let product = self.repository.create(new_product).await?;
        info!(
            product_id = product.id,
            images = product.source_images.len(),
            "Created product"
        );

        let mut publish_errors = Vec::new();
        for request in product.processing_requests() {
            match self.publisher.publish(&request).await {
                Ok(()) => debug!(
                    product_id = request.product_id,
                    image_url = %request.image_url,
                    "Published processing request"
                ),
                Err(e) => {
                    warn!(
                        product_id = request.product_id,
                        image_url = %request.image_url,
                        error = %e,
                        "Failed to publish processing request"
                    );
                    publish_errors.push((request, e));
                }
            }
        }

        Ok(CreatedProduct {
            product,
            publish_errors,
        })
    }

    /// Cache-aside read of one product.
    pub async fn get_product(&self, product_id: i64) -> Result<Product> {
        let fill_token = match self.cache.get(product_id).await {
            Ok(CacheLookup::Hit(product)) => {
                debug!(product_id, "Cache hit");
                return Ok(product);
            }
            Ok(CacheLookup::Miss(token)) => {
                debug!(product_id, "Cache miss");
                Some(token)
            }
            Err(e) => {
                warn!(product_id, error = %e, "Cache read failed, using repository");
                None
            }
        };

        let product = self.repository.get(product_id).await?;

        if let Some(token) = fill_token {
            match self.cache.set(&product, token).await {
                Ok(true) => {}
                Ok(false) => debug!(product_id, "Product changed during read, not caching"),
                Err(e) => warn!(product_id, error = %e, "Failed to populate cache"),
            }
        }
        Ok(product)
    }

    /// Filtered listing, always served from the repository.
    pub async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        self.repository.list(filter).await
    }
}

use super::ProductRepository;
use crate::models::{NewProduct, Product, ProductFilter};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Process-local repository; a slot write holds the table lock for the whole
/// read-modify-write of one record.
#[derive(Clone)]
pub struct InMemoryProductRepository {
    products: Arc<Mutex<BTreeMap<i64, Product>>>,
    next_id: Arc<Mutex<i64>>,
    get_count: Arc<Mutex<usize>>,
    update_count: Arc<Mutex<usize>>,
    read_delay: Option<Duration>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self {
            products: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(Mutex::new(1)),
            get_count: Arc::new(Mutex::new(0)),
            update_count: Arc::new(Mutex::new(0)),
            read_delay: None,
        }
    }

    /// Make `get` return its snapshot only after `delay`, so writes can land
    /// while a read is in flight.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn get_get_count(&self) -> usize {
        *self.get_count.lock().unwrap()
    }

    pub fn get_update_count(&self) -> usize {
        *self.update_count.lock().unwrap()
    }

    /// Current record without touching the call counters.
    pub fn snapshot(&self, product_id: i64) -> Option<Product> {
        self.products.lock().unwrap().get(&product_id).cloned()
    }
}

impl Default for InMemoryProductRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn get(&self, product_id: i64) -> Result<Product> {
        *self.get_count.lock().unwrap() += 1;
        let product = self.snapshot(product_id);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        product.ok_or(Error::NotFound(product_id))
    }

    async fn create(&self, product: NewProduct) -> Result<Product> {
        let id = {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };

        let created = Product {
            id,
            owner_id: product.owner_id,
            name: product.name,
            description: product.description,
            compressed_images: vec![String::new(); product.source_images.len()],
            source_images: product.source_images,
            price: product.price,
            created_at: Utc::now(),
        };
        self.products.lock().unwrap().insert(id, created.clone());
        Ok(created)
    }

    async fn list(&self, filter: &ProductFilter) -> Result<Vec<Product>> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .values()
            .filter(|product| filter.matches(product))
            .cloned()
            .collect())
    }

    async fn set_compressed_image(
        &self,
        product_id: i64,
        image_url: &str,
        compressed_url: &str,
    ) -> Result<()> {
        *self.update_count.lock().unwrap() += 1;

        let mut products = self.products.lock().unwrap();
        let product = products
            .get_mut(&product_id)
            .ok_or(Error::NotFound(product_id))?;

        if product.set_compressed(image_url, compressed_url) {
            Ok(())
        } else {
            Err(Error::SlotNotFound {
                product_id,
                image_url: image_url.to_string(),
            })
        }
    }
}

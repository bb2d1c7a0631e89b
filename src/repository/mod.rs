//! Product record storage
//!
//! The repository is the only writer of product records. Compressed-image
//! slots are written with a targeted per-slot update that commits atomically,
//! so concurrent requests for different images of one product never clobber
//! each other and no per-record lock is needed.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryProductRepository;
pub use postgres::PgProductRepository;

use crate::models::{NewProduct, Product, ProductFilter};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Fails with `Error::NotFound` when no record has this id.
    async fn get(&self, product_id: i64) -> Result<Product>;

    /// Persist a new record with one empty compressed slot per source image.
    async fn create(&self, product: NewProduct) -> Result<Product>;

    async fn list(&self, filter: &ProductFilter) -> Result<Vec<Product>>;

    /// Atomically write `compressed_url` into every slot whose source image is
    /// `image_url`, leaving all other slots untouched.
    ///
    /// Fails with `Error::NotFound` for an unknown product and
    /// `Error::SlotNotFound` when the product has no such source image.
    async fn set_compressed_image(
        &self,
        product_id: i64,
        image_url: &str,
        compressed_url: &str,
    ) -> Result<()>;
}

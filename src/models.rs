//! Data models and structures
//!
//! Defines product records, the processing-request wire format, and the
//! filters used by the read side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A product record as stored in the repository and cached by id.
///
/// `compressed_images[i]` holds the derivative of `source_images[i]`; an empty
/// string means the slot has not been processed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub source_images: Vec<String>,
    pub compressed_images: Vec<String>,
    /// Stored exactly to two decimal places; the `f64` round-trips those.
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Indices of every slot whose source matches `image_url`.
    pub fn slot_indices<'a>(&'a self, image_url: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.source_images
            .iter()
            .enumerate()
            .filter(move |(_, source)| source.as_str() == image_url)
            .map(|(i, _)| i)
    }

    /// Writes `compressed_url` into every slot matching `image_url`.
    ///
    /// Returns `false` when no slot matches. Pads `compressed_images` so its
    /// length tracks `source_images`.
    pub fn set_compressed(&mut self, image_url: &str, compressed_url: &str) -> bool {
        self.compressed_images.resize(self.source_images.len(), String::new());
        let indices: Vec<usize> = self.slot_indices(image_url).collect();
        for &i in &indices {
            self.compressed_images[i] = compressed_url.to_string();
        }
        !indices.is_empty()
    }

    /// One processing request per source image, in slot order.
    pub fn processing_requests(&self) -> Vec<ProcessingRequest> {
        self.source_images
            .iter()
            .map(|url| ProcessingRequest::new(self.id, url.clone()))
            .collect()
    }
}

/// Input for record creation; the repository assigns `id` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub owner_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source_images: Vec<String>,
    pub price: f64,
}

/// Filters for listing products. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductFilter {
    pub owner_id: Option<i64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        self.owner_id.map_or(true, |owner| product.owner_id == owner)
            && self.min_price.map_or(true, |min| product.price >= min)
            && self.max_price.map_or(true, |max| product.price <= max)
    }
}

/// A request to compress one source image of one product.
///
/// Serialized on the wire as `{"product_id": <int>, "image_url": <string>}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub product_id: i64,
    pub image_url: String,
}

impl ProcessingRequest {
    pub fn new(product_id: i64, image_url: String) -> Self {
        Self {
            product_id,
            image_url,
        }
    }

    /// Message key used for transport-level partitioning.
    pub fn message_key(&self) -> String {
        self.product_id.to_string()
    }

    pub fn to_payload(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

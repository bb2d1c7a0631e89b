//! Durable object storage for compressed derivatives
//!
//! Uploads bytes to an S3-compatible bucket and hands back the public URL,
//! which is a pure function of bucket, store domain and key.

pub mod client;
pub mod mock;

pub use client::S3ObjectStore;
pub use mock::MockObjectStore;

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, overwriting any previous object.
    async fn upload(&self, key: &str, data: &[u8]) -> Result<String>;
}

/// `compressed/<product_id>_<basename of the source URL>`
pub fn object_key(product_id: i64, image_url: &str) -> String {
    format!("compressed/{}_{}", product_id, basename(image_url))
}

pub fn public_url(bucket: &str, domain: &str, key: &str) -> String {
    format!("https://{}.{}/{}", bucket, domain, key)
}

pub fn content_type_for_key(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

fn basename(image_url: &str) -> String {
    let path = match reqwest::Url::parse(image_url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => image_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("image")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_scheme() {
        assert_eq!(object_key(7, "http://x/a.jpg"), "compressed/7_a.jpg");
        assert_eq!(
            object_key(12, "https://cdn.shop.test/img/products/lamp.png?v=3#top"),
            "compressed/12_lamp.png"
        );
        assert_eq!(object_key(3, "https://host.test/dir/"), "compressed/3_dir");
        assert_eq!(object_key(3, "https://host.test"), "compressed/3_image");
        assert_eq!(object_key(4, "not a url/pic.gif?x=1"), "compressed/4_pic.gif");
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url("product-images", "s3.amazonaws.com", "compressed/7_a.jpg"),
            "https://product-images.s3.amazonaws.com/compressed/7_a.jpg"
        );
    }

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type_for_key("compressed/1_a.jpg"), "image/jpeg");
        assert_eq!(content_type_for_key("compressed/1_a.JPEG"), "image/jpeg");
        assert_eq!(content_type_for_key("compressed/1_a.png"), "image/png");
        assert_eq!(content_type_for_key("compressed/1_a"), "application/octet-stream");
        assert_eq!(content_type_for_key("compressed/1_a.xyz"), "application/octet-stream");
    }
}

//! Image codec: fetch a remote image and re-encode it compactly
//!
//! JPEG sources are re-encoded as lossy JPEG at the requested quality;
//! RGB/RGBA sources in other formats are re-encoded losslessly as PNG.

pub mod mock;
pub mod processor;

pub use mock::MockImageCodec;
pub use processor::ImageProcessor;

use crate::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub data: Vec<u8>,
    pub format: OutputFormat,
}

#[async_trait]
pub trait ImageCodec: Send + Sync {
    /// One fetch attempt followed by one re-encode; never retries.
    async fn fetch_and_compress(&self, url: &str, quality: u8) -> Result<CompressedImage>;
}

use super::{CompressedImage, ImageCodec, OutputFormat};
use crate::{Error, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat};
use reqwest::Client;
use std::io::Cursor;
use std::time::Duration;

pub struct ImageProcessor {
    client: Client,
}

impl ImageProcessor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(image_url = %url, "Fetching source image");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!(
                "GET {} returned status {}",
                url, status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Fetch(format!("Failed to read body of {}: {}", url, e)))?;

        Ok(body.to_vec())
    }

    /// Decode `data` and re-encode it according to its color model.
    pub fn compress(data: &[u8], quality: u8) -> Result<CompressedImage> {
        let source_format = image::guess_format(data)
            .map_err(|e| Error::Decode(format!("Unrecognized image data: {}", e)))?;
        let img = image::load_from_memory_with_format(data, source_format)
            .map_err(|e| Error::Decode(e.to_string()))?;

        if source_format == ImageFormat::Jpeg {
            return Self::encode_jpeg(img, quality.clamp(1, 100));
        }

        match img.color() {
            ColorType::Rgb8 | ColorType::Rgba8 | ColorType::Rgb16 | ColorType::Rgba16 => {
                let mut data = Vec::new();
                img.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)
                    .map_err(|e| Error::Invariant(format!("PNG encoding failed: {}", e)))?;
                Ok(CompressedImage {
                    data,
                    format: OutputFormat::Png,
                })
            }
            other => Err(Error::UnsupportedFormat(format!(
                "{:?} image with color model {:?}",
                source_format, other
            ))),
        }
    }

    fn encode_jpeg(img: DynamicImage, quality: u8) -> Result<CompressedImage> {
        let mut data = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut data, quality);
        let encoded = match img {
            DynamicImage::ImageLuma8(gray) => encoder.encode_image(&gray),
            other => encoder.encode_image(&other.to_rgb8()),
        };
        encoded.map_err(|e| Error::Invariant(format!("JPEG encoding failed: {}", e)))?;

        Ok(CompressedImage {
            data,
            format: OutputFormat::Jpeg,
        })
    }
}

#[async_trait]
impl ImageCodec for ImageProcessor {
    async fn fetch_and_compress(&self, url: &str, quality: u8) -> Result<CompressedImage> {
        let body = self.fetch(url).await?;
        let fetched = body.len();

        let compressed = tokio::task::spawn_blocking(move || Self::compress(&body, quality))
            .await
            .map_err(|e| Error::Invariant(format!("Image compression task join error: {}", e)))??;

        tracing::debug!(
            image_url = %url,
            fetched_bytes = fetched,
            compressed_bytes = compressed.data.len(),
            format = ?compressed.format,
            "Compressed image"
        );

        Ok(compressed)
    }
}

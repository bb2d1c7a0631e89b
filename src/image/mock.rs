use super::{CompressedImage, ImageCodec, OutputFormat};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deterministic codec: the output depends only on `(url, quality)`.
#[derive(Clone)]
pub struct MockImageCodec {
    call_count: Arc<Mutex<usize>>,
    transient_failures: Arc<Mutex<usize>>,
    should_fail: Arc<Mutex<bool>>,
    delay: Option<Duration>,
}

impl MockImageCodec {
    pub fn new() -> Self {
        Self {
            call_count: Arc::new(Mutex::new(0)),
            transient_failures: Arc::new(Mutex::new(0)),
            should_fail: Arc::new(Mutex::new(false)),
            delay: None,
        }
    }

    /// Every call fails with a non-retryable decode error.
    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    /// The next `count` calls fail with a retryable fetch error.
    pub fn with_transient_failures(self, count: usize) -> Self {
        *self.transient_failures.lock().unwrap() = count;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

impl Default for MockImageCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageCodec for MockImageCodec {
    async fn fetch_and_compress(&self, url: &str, quality: u8) -> Result<CompressedImage> {
        *self.call_count.lock().unwrap() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut remaining = self.transient_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Fetch(format!("Mock fetch failure for {}", url)));
            }
        }

        if *self.should_fail.lock().unwrap() {
            return Err(Error::Decode(format!("Mock decode failure for {}", url)));
        }

        let format = if url.to_ascii_lowercase().ends_with(".png") {
            OutputFormat::Png
        } else {
            OutputFormat::Jpeg
        };

        Ok(CompressedImage {
            data: format!("compressed:{}:{}", url, quality).into_bytes(),
            format,
        })
    }
}

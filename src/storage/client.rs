use super::{content_type_for_key, public_url, ObjectStore};
use crate::config::StorageConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{config::Region, Client as S3Client};

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    public_domain: String,
}

impl S3ObjectStore {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_sdk_s3::config::Credentials::new(
                access_key_id.clone(),
                secret_access_key.clone(),
                None,
                None,
                "image-ingest",
            );
            loader = loader.credentials_provider(credentials);
        }

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let sdk_config = loader.load().await;

        // S3-compatible stores behind a custom endpoint rarely support
        // virtual-hosted bucket addressing.
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint.is_some())
            .build();

        Ok(Self::with_client(
            S3Client::from_conf(s3_config),
            config.bucket.clone(),
            config.public_domain.clone(),
        ))
    }

    pub fn with_client(client: S3Client, bucket: String, public_domain: String) -> Self {
        Self {
            client,
            bucket,
            public_domain,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(&self, key: &str, data: &[u8]) -> Result<String> {
        let body = ByteStream::from(data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for_key(key))
            .send()
            .await
            .map_err(|e| Error::Upload(format!("Failed to upload {}: {}", key, e)))?;

        let url = public_url(&self.bucket, &self.public_domain, key);
        tracing::debug!(key = %key, url = %url, bytes = data.len(), "Uploaded object");
        Ok(url)
    }
}

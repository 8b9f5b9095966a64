use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client as S3Client;

use crate::config::Config;
use crate::models::{IngestionError, Result};

/// Read access to the tenant object store (S3 or MinIO). Event paths are
/// object keys under one configured bucket.
#[derive(Clone)]
pub struct ObjectStoreClient {
    client: S3Client,
    bucket: String,
}

impl ObjectStoreClient {
    pub async fn new(config: &Config) -> Result<Self> {
        let base_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()));

        let loader = if let (Some(access_key), Some(secret_key)) =
            (&config.aws_access_key_id, &config.aws_secret_access_key)
        {
            let creds = aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "ingestion-service",
            );
            base_loader.credentials_provider(creds)
        } else {
            base_loader
        };

        let shared_config = loader.load().await;

        // Honor a custom endpoint (e.g. MinIO); path-style is what MinIO expects.
        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &config.aws_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = S3Client::from_conf(s3_config_builder.build());

        Ok(Self { client, bucket: config.object_store_bucket.clone() })
    }

    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| IngestionError::ObjectStore(format!("get {}: {}", key, e)))?;

        let data = object
            .body
            .collect()
            .await
            .map_err(|e| IngestionError::ObjectStore(format!("read {}: {}", key, e)))?;
        let bytes = data.into_bytes().to_vec();

        tracing::debug!(key = key, size_bytes = bytes.len(), "Fetched object");
        Ok(bytes)
    }
}

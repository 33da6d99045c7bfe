//! Concrete `ObjectStore` over S3-compatible storage, grounded on the
//! blob get/put/delete calls of a Garage-backed store. The mailbox
//! engine only depends on the `mailgram_engine::fetch::ObjectStore`
//! trait; this is one way to satisfy it.

use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;

use mailgram_engine::fetch::ObjectStore;
use mailgram_store::{CoreError, Result};

use crate::config::ObjectStoreConfig;

pub struct S3ObjectStore {
    bucket: String,
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub async fn connect(config: &ObjectStoreConfig) -> anyhow::Result<Self> {
        let creds = aws_sdk_s3::config::Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "mailgram",
        );

        let sdk_config = aws_config::from_env()
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(creds)
            .endpoint_url(config.endpoint.clone())
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(true).build();
        let client = aws_sdk_s3::Client::from_conf(s3_config);

        Ok(Self { bucket: config.bucket.clone(), client })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, content_hash: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(content_hash)
            .send()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(SdkError::ServiceError(e)) if matches!(e.err(), GetObjectError::NoSuchKey(_)) => {
                return Err(CoreError::NotFound)
            }
            Err(e) => return Err(CoreError::Transient(anyhow::anyhow!(e))),
        };

        output
            .body
            .collect()
            .await
            .map(|aggregated| aggregated.to_vec())
            .map_err(|e| CoreError::Transient(anyhow::anyhow!(e)))
    }

    async fn put(&self, content_hash: &str, bytes: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(content_hash)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| CoreError::Transient(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn delete(&self, content_hash: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(content_hash)
            .send()
            .await
            .map_err(|e| CoreError::Transient(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

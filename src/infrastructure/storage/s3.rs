use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::error::{StorageError, StorageResult};
use crate::modules::video::traits::{Bucket, ObjectReader};

#[derive(Clone)]
pub struct StorageService {
    client: Client,
}

impl StorageService {
    pub fn new(endpoint: &str, region: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        info!("✅ S3 client configured for {}", endpoint);

        Self {
            client: Client::from_conf(config),
        }
    }

    /// Create `bucket` unless it already exists.
    pub async fn ensure_bucket_exists(&self, bucket: &str) -> StorageResult<()> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!("Created bucket {}", bucket);
                Ok(())
            }
            Err(e) => {
                let exists = e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                });
                if exists {
                    debug!("Bucket {} already exists", bucket);
                    Ok(())
                } else {
                    Err(StorageError::BucketCreateFailed {
                        bucket: bucket.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    })
                }
            }
        }
    }

    async fn get(&self, bucket: &str, key: &str, range: Option<&str>) -> StorageResult<ObjectReader> {
        let mut request = self.client.get_object().bucket(bucket).key(key);
        if let Some(range) = range {
            request = request.range(range);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::download_failed(key, DisplayErrorContext(&e)))?;

        Ok(Box::new(Box::pin(response.body.into_async_read())))
    }
}

/// Content type for an object key; HLS manifests and MPEG-TS segments are
/// not reliably known to mime tables.
pub fn content_type_for(key: &str) -> String {
    if key.ends_with(".m3u8") {
        return "application/vnd.apple.mpegurl".to_string();
    }
    if key.ends_with(".ts") {
        return "video/MP2T".to_string();
    }
    mime_guess::from_path(key)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[async_trait]
impl Bucket for StorageService {
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        self.get(bucket, key, None).await
    }

    async fn get_object_range(
        &self,
        bucket: &str,
        key: &str,
        range: &str,
    ) -> StorageResult<ObjectReader> {
        self.get(bucket, key, Some(range)).await
    }

    async fn upload_from_reader(
        &self,
        bucket: &str,
        key: &str,
        mut reader: ObjectReader,
    ) -> StorageResult<()> {
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .await
            .map_err(|e| StorageError::upload_failed(key, e))?;

        debug!("Uploading {} bytes to {}/{}", body.len(), bucket, key);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type_for(key))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(key, DisplayErrorContext(&e)))?;

        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(key, DisplayErrorContext(&e)))?;

        Ok(())
    }

    async fn delete_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<()> {
        let mut continuation_token: Option<String> = None;
        let mut deleted = 0usize;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let page = request.send().await.map_err(|e| StorageError::ListFailed {
                prefix: prefix.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

            let objects = page
                .contents()
                .iter()
                .filter_map(|obj| obj.key())
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::delete_failed(prefix, e))?;

            if !objects.is_empty() {
                let count = objects.len();
                let delete = Delete::builder()
                    .set_objects(Some(objects))
                    .quiet(true)
                    .build()
                    .map_err(|e| StorageError::delete_failed(prefix, e))?;

                self.client
                    .delete_objects()
                    .bucket(bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| StorageError::delete_failed(prefix, DisplayErrorContext(&e)))?;

                deleted += count;
            }

            if page.is_truncated() == Some(true) {
                continuation_token = page.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        debug!("Deleted {} objects under {}/{}", deleted, bucket, prefix);
        Ok(())
    }
}

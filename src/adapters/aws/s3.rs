use crate::error::StorageError;
use crate::ports::storage::{ObjectBody, ObjectReader, StoragePort};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// S3Adapter implements StoragePort for AWS S3.
#[derive(Clone)]
pub struct S3Adapter {
    client: Client,
    region: String,
    public_base_url: Option<String>,
}

impl S3Adapter {
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
            public_base_url: None,
        }
    }

    /// Serve object URLs from a CDN or custom domain instead of the bucket host.
    pub fn with_public_base_url(mut self, base: Option<String>) -> Self {
        self.public_base_url = base.map(|b| b.trim_end_matches('/').to_string());
        self
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        object_url(self.public_base_url.as_deref(), bucket, &self.region, key)
    }
}

fn object_url(public_base_url: Option<&str>, bucket: &str, region: &str, key: &str) -> String {
    match public_base_url {
        Some(base) => format!("{base}/{key}"),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
    }
}

#[async_trait]
impl StoragePort for S3Adapter {
    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    StorageError::not_found(bucket, key)
                } else {
                    StorageError::download(key, DisplayErrorContext(&e))
                }
            })?;

        Ok(Box::new(Box::pin(resp.body.into_async_read())))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String, StorageError> {
        let stream = match body {
            ObjectBody::Bytes(bytes) => ByteStream::from(bytes),
            ObjectBody::File(path) => ByteStream::from_path(&path)
                .await
                .map_err(|e| StorageError::upload(key, e))?,
        };

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(stream)
            .content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| StorageError::upload(key, DisplayErrorContext(&e)))?;

        debug!(bucket, key, content_type, "Uploaded object");
        Ok(self.object_url(bucket, key))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::Backend(DisplayErrorContext(&e).to_string())),
        }
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let presign_error = |message: String| StorageError::Presign {
            key: key.to_string(),
            message,
        };

        let config = PresigningConfig::expires_in(ttl).map_err(|e| presign_error(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| presign_error(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_default_to_the_regional_bucket_host() {
        assert_eq!(
            object_url(None, "videos", "ap-south-1", "p/u1/v/hls/master.m3u8"),
            "https://videos.s3.ap-south-1.amazonaws.com/p/u1/v/hls/master.m3u8"
        );
    }

    #[test]
    fn public_base_url_overrides_the_host() {
        assert_eq!(
            object_url(Some("https://cdn.example.com"), "videos", "us-east-1", "a/b.ts"),
            "https://cdn.example.com/a/b.ts"
        );
    }
}

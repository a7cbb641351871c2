use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Streaming body of a downloaded object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Payload of an upload.
#[derive(Debug, Clone)]
pub enum ObjectBody {
    Bytes(Bytes),
    /// Streamed from a local file
    File(PathBuf),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Open an object for reading. Missing objects are `StorageError::NotFound`.
    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError>;

    /// Store an object and return its public URL.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String, StorageError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    /// Time-limited read URL for an object.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;
}

/// Content type of a produced HLS file, by extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    if file_name.ends_with(".m3u8") {
        "application/x-mpegURL"
    } else if file_name.ends_with(".ts") {
        "video/MP2T"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_hls_files() {
        assert_eq!(content_type_for("playlist.m3u8"), "application/x-mpegURL");
        assert_eq!(content_type_for("segment_004.ts"), "video/MP2T");
        assert_eq!(content_type_for("thumb.jpg"), "application/octet-stream");
    }
}

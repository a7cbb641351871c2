use crate::error::StorageError;
use crate::ports::storage::{ObjectBody, ObjectReader, StoragePort};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Object storage on the local filesystem: `<root>/<bucket>/<key>`.
///
/// Object metadata is kept beside the data under `<root>/.meta/<bucket>/<key>.json`.
#[derive(Clone, Debug)]
pub struct FsAdapter {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base_url: None,
        }
    }

    /// Serve URLs from `base` (e.g. a static file server over `root`)
    /// instead of `file://` paths.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        self.public_base_url = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let relative = safe_relative(bucket)?.join(safe_relative(key)?);
        Ok(self.root.join(relative))
    }

    fn metadata_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let relative = safe_relative(bucket)?.join(safe_relative(&format!("{key}.json"))?);
        Ok(self.root.join(".meta").join(relative))
    }

    /// Metadata stored alongside an object, if any.
    pub async fn metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<HashMap<String, String>, StorageError> {
        let path = self.metadata_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| StorageError::Backend(format!("corrupt metadata for {key}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn object_url(&self, bucket: &str, key: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{bucket}/{key}"),
            None => format!("file://{}", path.display()),
        }
    }
}

/// Reject absolute keys and `..` so every object stays under the root.
fn safe_relative(key: &str) -> Result<PathBuf, StorageError> {
    let path = Path::new(key.trim_start_matches('/'));
    if key.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::Backend(format!("invalid object key: {key}")));
    }
    Ok(path.to_path_buf())
}

#[async_trait]
impl StoragePort for FsAdapter {
    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(bucket, key))
            }
            Err(e) => Err(StorageError::download(key, e)),
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String, StorageError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match body {
            ObjectBody::Bytes(bytes) => tokio::fs::write(&path, &bytes)
                .await
                .map_err(|e| StorageError::upload(key, e))?,
            ObjectBody::File(source) => {
                tokio::fs::copy(&source, &path)
                    .await
                    .map_err(|e| StorageError::upload(key, e))?;
            }
        }

        let mut stored = metadata.clone();
        stored.insert("content-type".to_string(), content_type.to_string());
        let meta_path = self.metadata_path(bucket, key)?;
        if let Some(parent) = meta_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let encoded = serde_json::to_vec(&stored)
            .map_err(|e| StorageError::upload(key, e))?;
        tokio::fs::write(&meta_path, encoded).await?;

        debug!(bucket, key, content_type, "Stored object");
        Ok(self.object_url(bucket, key, &path))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let path = self.object_path(bucket, key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let path = self.object_path(bucket, key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::not_found(bucket, key));
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("{}?expires={}", self.object_url(bucket, key, &path), expires))
    }
}

//! Redis VideoRepository implementation.

use super::error::RedisAdapterError;
use super::pool::RedisPool;
use super::{VIDEO_OUTCOME_PREFIX, VIDEO_RECORD_PREFIX};
use crate::domain::jobs::{ProcessingOutcome, VideoRecord, VideoStatus};
use crate::error::RepositoryError;
use crate::ports::repository::VideoRepository;
use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::Connection;
use uuid::Uuid;

fn record_key(video_id: Uuid) -> String {
    format!("{}{}", VIDEO_RECORD_PREFIX, video_id)
}

impl RedisPool {
    async fn connection(&self) -> Result<Connection, RepositoryError> {
        Ok(self.pool.get().await.map_err(RedisAdapterError::from)?)
    }

    async fn load(
        conn: &mut Connection,
        video_id: Uuid,
    ) -> Result<Option<VideoRecord>, RepositoryError> {
        let json: Option<String> = conn
            .get(record_key(video_id))
            .await
            .map_err(RedisAdapterError::from)?;
        match json {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn store(conn: &mut Connection, record: &VideoRecord) -> Result<(), RepositoryError> {
        let json = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(record_key(record.id), json)
            .await
            .map_err(RedisAdapterError::from)?;
        Ok(())
    }

    /// Register a freshly uploaded video.
    pub async fn register_video(&self, record: &VideoRecord) -> Result<(), RepositoryError> {
        let mut conn = self.connection().await?;
        Self::store(&mut conn, record).await
    }
}

#[async_trait]
impl VideoRepository for RedisPool {
    async fn get_video_record(
        &self,
        video_id: Uuid,
    ) -> Result<Option<VideoRecord>, RepositoryError> {
        let mut conn = self.connection().await?;
        Self::load(&mut conn, video_id).await
    }

    async fn update_video_status(
        &self,
        video_id: Uuid,
        status: VideoStatus,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.connection().await?;
        let mut record = Self::load(&mut conn, video_id)
            .await?
            .ok_or(RepositoryError::NotFound(video_id))?;
        record.status = status;
        Self::store(&mut conn, &record).await
    }

    async fn save_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), RepositoryError> {
        let mut conn = self.connection().await?;
        let mut record = Self::load(&mut conn, outcome.video_id)
            .await?
            .ok_or(RepositoryError::NotFound(outcome.video_id))?;
        record.status = outcome.status;
        record.master_manifest_url = outcome.master_manifest_url.clone();
        record.renditions = outcome.renditions.clone();
        Self::store(&mut conn, &record).await?;

        let json = serde_json::to_string(outcome)?;
        conn.set::<_, _, ()>(format!("{}{}", VIDEO_OUTCOME_PREFIX, outcome.video_id), json)
            .await
            .map_err(RedisAdapterError::from)?;
        Ok(())
    }
}

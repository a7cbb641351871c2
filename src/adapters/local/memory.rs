use crate::domain::jobs::{ProcessingOutcome, VideoRecord, VideoStatus};
use crate::error::RepositoryError;
use crate::ports::repository::VideoRepository;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local repository. Keeps every status transition so callers can
/// inspect the lifecycle a video went through.
#[derive(Clone, Default)]
pub struct InMemoryVideoRepository {
    records: Arc<RwLock<HashMap<Uuid, VideoRecord>>>,
    history: Arc<RwLock<HashMap<Uuid, Vec<VideoStatus>>>>,
    outcomes: Arc<RwLock<HashMap<Uuid, ProcessingOutcome>>>,
}

impl InMemoryVideoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: VideoRecord) {
        self.history
            .write()
            .await
            .entry(record.id)
            .or_default()
            .push(record.status);
        self.records.write().await.insert(record.id, record);
    }

    pub async fn status_history(&self, video_id: Uuid) -> Vec<VideoStatus> {
        self.history
            .read()
            .await
            .get(&video_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn outcome(&self, video_id: Uuid) -> Option<ProcessingOutcome> {
        self.outcomes.read().await.get(&video_id).cloned()
    }
}

#[async_trait]
impl VideoRepository for InMemoryVideoRepository {
    async fn get_video_record(
        &self,
        video_id: Uuid,
    ) -> Result<Option<VideoRecord>, RepositoryError> {
        Ok(self.records.read().await.get(&video_id).cloned())
    }

    async fn update_video_status(
        &self,
        video_id: Uuid,
        status: VideoStatus,
    ) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&video_id)
            .ok_or(RepositoryError::NotFound(video_id))?;
        record.status = status;
        self.history
            .write()
            .await
            .entry(video_id)
            .or_default()
            .push(status);
        Ok(())
    }

    async fn save_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&outcome.video_id)
            .ok_or(RepositoryError::NotFound(outcome.video_id))?;
        record.status = outcome.status;
        record.master_manifest_url = outcome.master_manifest_url.clone();
        record.renditions = outcome.renditions.clone();
        self.outcomes
            .write()
            .await
            .insert(outcome.video_id, outcome.clone());
        Ok(())
    }
}

use crate::domain::jobs::{ProcessingOutcome, VideoRecord, VideoStatus};
use crate::error::RepositoryError;
use crate::ports::repository::VideoRepository;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Moves a video record through `uploaded → processing → completed | failed`.
/// Written once when processing starts and once when it ends.
pub struct StatusReporter<R> {
    repo: Arc<R>,
}

impl<R> Clone for StatusReporter<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
        }
    }
}

impl<R: VideoRepository> StatusReporter<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn mark_processing(&self, video_id: Uuid) -> Result<(), RepositoryError> {
        debug!(video_id = %video_id, "Marking video as processing");
        self.repo
            .update_video_status(video_id, VideoStatus::Processing)
            .await
    }

    /// Persist a finished outcome, status included.
    pub async fn report_completed(&self, outcome: &ProcessingOutcome) -> Result<(), RepositoryError> {
        self.repo.save_outcome(outcome).await?;
        info!(
            video_id = %outcome.video_id,
            status = %outcome.status,
            manifest = %outcome.master_manifest_url,
            "Outcome saved"
        );
        Ok(())
    }

    pub async fn report_failed(&self, video_id: Uuid) -> Result<(), RepositoryError> {
        self.repo
            .update_video_status(video_id, VideoStatus::Failed)
            .await
    }

    /// Current record of a video, for status queries.
    pub async fn status_of(&self, video_id: Uuid) -> Result<VideoRecord, RepositoryError> {
        self.repo
            .get_video_record(video_id)
            .await?
            .ok_or(RepositoryError::NotFound(video_id))
    }
}

use crate::domain::jobs::{ProcessingOutcome, VideoRecord, VideoStatus};
use crate::error::RepositoryError;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence of video records. The pipeline reads records and writes
/// status transitions and the final outcome.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoRepository: Send + Sync {
    async fn get_video_record(&self, video_id: Uuid) -> Result<Option<VideoRecord>, RepositoryError>;

    async fn update_video_status(
        &self,
        video_id: Uuid,
        status: VideoStatus,
    ) -> Result<(), RepositoryError>;

    /// Persist manifest URL and produced renditions of a finished video.
    async fn save_outcome(&self, outcome: &ProcessingOutcome) -> Result<(), RepositoryError>;
}

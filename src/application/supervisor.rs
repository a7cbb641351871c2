//! Supervised handoff from the upload side to the orchestrator.
//!
//! Every video runs as a tracked task with its own cancellation token, so
//! callers can cancel it, await it, and see it fail.

use super::orchestrator::OrchestratorService;
use crate::domain::jobs::{ProcessRequest, ProcessingOutcome};
use crate::error::PipelineError;
use crate::ports::media::MediaToolPort;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::StoragePort;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};
use uuid::Uuid;

type ActiveVideos = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Handle on one video's processing task.
pub struct VideoTask {
    video_id: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<Result<ProcessingOutcome, PipelineError>>,
}

impl VideoTask {
    pub fn video_id(&self) -> Uuid {
        self.video_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<ProcessingOutcome, PipelineError> {
        self.handle
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?
    }
}

/// Drops the video from the active set when its task ends, panics included.
struct ActiveGuard {
    active: ActiveVideos,
    video_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.video_id);
    }
}

pub struct ProcessingSupervisor<S, M, R> {
    orchestrator: Arc<OrchestratorService<S, M, R>>,
    active: ActiveVideos,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl<S, M, R> ProcessingSupervisor<S, M, R>
where
    S: StoragePort + 'static,
    M: MediaToolPort + 'static,
    R: VideoRepository + 'static,
{
    pub fn new(orchestrator: Arc<OrchestratorService<S, M, R>>) -> Self {
        Self {
            orchestrator,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Start processing a video. A video already in flight is rejected.
    pub fn submit(&self, request: ProcessRequest) -> Result<VideoTask, PipelineError> {
        if self.tracker.is_closed() {
            return Err(PipelineError::Task("supervisor is shut down".to_string()));
        }

        let video_id = request.video_id;
        let cancel = self.shutdown.child_token();
        {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if active.contains_key(&video_id) {
                return Err(PipelineError::AlreadyProcessing(video_id));
            }
            active.insert(video_id, cancel.clone());
        }

        let guard = ActiveGuard {
            active: self.active.clone(),
            video_id,
        };
        let orchestrator = self.orchestrator.clone();
        let task_cancel = cancel.clone();
        let handle = self.tracker.spawn(async move {
            let _guard = guard;
            let result = orchestrator.process_video(&request, &task_cancel).await;
            match &result {
                Ok(outcome) => info!(
                    video_id = %video_id,
                    renditions = outcome.renditions.len(),
                    "Video task finished"
                ),
                Err(e) => error!(video_id = %video_id, error = %e, "Video task failed"),
            }
            result
        });

        info!(video_id = %video_id, "Video task started");
        Ok(VideoTask {
            video_id,
            cancel,
            handle,
        })
    }

    /// Cancel a running video. Returns false when it is not in flight.
    pub fn cancel(&self, video_id: Uuid) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(&video_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_videos(&self) -> Vec<Uuid> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Stop accepting videos and wait for running ones to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Stop accepting videos, cancel running ones and wait for them.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.drain().await;
        info!("Processing supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::jobs::VideoStatus;
    use crate::testing::{FakeMediaTool, LocalPipeline};
    use std::time::Duration;

    #[tokio::test]
    async fn submitted_video_can_be_joined() {
        let pipeline = LocalPipeline::start(FakeMediaTool::new()).await;
        let supervisor = ProcessingSupervisor::new(pipeline.orchestrator.clone());
        let task = supervisor.submit(pipeline.request().await).unwrap();
        let video_id = task.video_id();

        let outcome = task.join().await.unwrap();
        assert_eq!(outcome.renditions.len(), 4);
        assert!(supervisor.active_videos().is_empty());
        assert_eq!(
            pipeline.repo.get_video_record(video_id).await.unwrap().unwrap().status,
            VideoStatus::Completed
        );
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let media = FakeMediaTool::new().with_delay(Duration::from_millis(200));
        let pipeline = LocalPipeline::start(media).await;
        let supervisor = ProcessingSupervisor::new(pipeline.orchestrator.clone());
        let req = pipeline.request().await;

        let task = supervisor.submit(req.clone()).unwrap();
        assert_eq!(supervisor.active_videos(), vec![req.video_id]);
        assert!(matches!(
            supervisor.submit(req.clone()),
            Err(PipelineError::AlreadyProcessing(id)) if id == req.video_id
        ));
        task.join().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_by_video_id_fails_the_video() {
        let media = FakeMediaTool::new().with_delay(Duration::from_secs(30));
        let pipeline = LocalPipeline::start(media).await;
        let supervisor = ProcessingSupervisor::new(pipeline.orchestrator.clone());
        let req = pipeline.request().await;

        let task = supervisor.submit(req.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(supervisor.cancel(req.video_id));
        assert!(!supervisor.cancel(Uuid::new_v4()));

        let result = tokio::time::timeout(Duration::from_secs(5), task.join())
            .await
            .unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(
            pipeline
                .repo
                .get_video_record(req.video_id)
                .await
                .unwrap()
                .unwrap()
                .status,
            VideoStatus::Failed
        );
    }

    #[tokio::test]
    async fn task_handle_cancels_its_own_video() {
        let media = FakeMediaTool::new().with_delay(Duration::from_secs(30));
        let pipeline = LocalPipeline::start(media).await;
        let supervisor = ProcessingSupervisor::new(pipeline.orchestrator.clone());

        let task = supervisor.submit(pipeline.request().await).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task.join())
            .await
            .unwrap();
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn shutdown_cancels_running_videos_and_refuses_new_ones() {
        let media = FakeMediaTool::new().with_delay(Duration::from_secs(30));
        let pipeline = LocalPipeline::start(media).await;
        let supervisor = ProcessingSupervisor::new(pipeline.orchestrator.clone());

        let task = supervisor.submit(pipeline.request().await).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(Duration::from_secs(5), supervisor.shutdown())
            .await
            .unwrap();

        assert!(supervisor.active_videos().is_empty());
        assert!(matches!(task.join().await, Err(PipelineError::Cancelled)));
        assert!(matches!(
            supervisor.submit(pipeline.request().await),
            Err(PipelineError::Task(_))
        ));
    }
}

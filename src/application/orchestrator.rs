//! Per-video processing: download, probe, dispatch one job per rendition,
//! aggregate results and publish the master manifest.

use super::status::StatusReporter;
use super::worker_pool::{JobBatch, WorkerPool, PROCESSOR_NAME};
use crate::config::PipelineConfig;
use crate::domain::hls::MasterPlaylist;
use crate::domain::jobs::{Job, ProcessRequest, ProcessingOutcome};
use crate::domain::ladder::{quality_ladder, Rendition};
use crate::domain::layout::OutputLayout;
use crate::error::{PipelineError, StorageError};
use crate::ports::media::MediaToolPort;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::{content_type_for, ObjectBody, StoragePort};
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where a video is in its processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    Downloading,
    Probing,
    LadderComputed,
    Dispatching,
    Aggregating,
    Finalizing,
    Completed,
    Failed,
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingStage::Downloading => "downloading",
            ProcessingStage::Probing => "probing",
            ProcessingStage::LadderComputed => "ladder_computed",
            ProcessingStage::Dispatching => "dispatching",
            ProcessingStage::Aggregating => "aggregating",
            ProcessingStage::Finalizing => "finalizing",
            ProcessingStage::Completed => "completed",
            ProcessingStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct OrchestratorService<S, M, R> {
    storage: Arc<S>,
    media: Arc<M>,
    pool: Arc<WorkerPool<S, M>>,
    reporter: StatusReporter<R>,
    layout: OutputLayout,
    config: PipelineConfig,
}

impl<S, M, R> OrchestratorService<S, M, R>
where
    S: StoragePort + 'static,
    M: MediaToolPort + 'static,
    R: VideoRepository,
{
    pub fn new(
        storage: Arc<S>,
        media: Arc<M>,
        pool: Arc<WorkerPool<S, M>>,
        repo: Arc<R>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            storage,
            media,
            pool,
            reporter: StatusReporter::new(repo),
            layout: OutputLayout::new(config.key_prefix.clone()),
            config,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool<S, M>> {
        &self.pool
    }

    /// Run one video end to end.
    ///
    /// Download and probe failures are fatal and mark the video failed, as
    /// does cancellation. Rendition failures, dropped submissions, an
    /// aggregation timeout and a missing master manifest all end as a
    /// `completed` outcome carrying fewer renditions and warnings.
    pub async fn process_video(
        &self,
        request: &ProcessRequest,
        cancel: &CancellationToken,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let started = Instant::now();
        let video_id = request.video_id;
        info!(
            video_id = %video_id,
            user_id = %request.user_id,
            source = %request.source_key,
            "Starting video processing"
        );

        let mut warnings = Vec::new();
        if let Err(e) = self.reporter.mark_processing(video_id).await {
            warn!(video_id = %video_id, error = %e, "Could not mark video as processing");
            warnings.push(format!("Status update failed: {e}"));
        }

        match self.run(request, cancel, started, warnings).await {
            Ok(outcome) => {
                if let Err(e) = self.reporter.report_completed(&outcome).await {
                    enter(video_id, ProcessingStage::Failed);
                    error!(video_id = %video_id, error = %e, "Could not save processing outcome");
                    if let Err(report) = self.reporter.report_failed(video_id).await {
                        error!(video_id = %video_id, error = %report, "Could not mark video as failed");
                    }
                    return Err(PipelineError::Repository(e));
                }
                enter(video_id, ProcessingStage::Completed);
                info!(
                    video_id = %video_id,
                    renditions = outcome.renditions.len(),
                    expected = outcome.expected,
                    compression_ratio = outcome.compression_ratio,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "{}",
                    outcome.summary()
                );
                Ok(outcome)
            }
            Err(e) => {
                enter(video_id, ProcessingStage::Failed);
                error!(video_id = %video_id, error = %e, "Video processing failed");
                if let Err(report) = self.reporter.report_failed(video_id).await {
                    error!(video_id = %video_id, error = %report, "Could not mark video as failed");
                }
                Err(e)
            }
        }
    }

    /// Look up `{storage_key, user_id}` of a stored video and process it.
    pub async fn process_stored_video(
        &self,
        bucket: &str,
        video_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let record = self
            .reporter
            .status_of(video_id)
            .await
            .map_err(PipelineError::Repository)?;

        let request = ProcessRequest {
            bucket: bucket.to_string(),
            source_key: record.storage_key,
            video_id,
            user_id: record.user_id,
        };
        self.process_video(&request, cancel).await
    }

    async fn run(
        &self,
        request: &ProcessRequest,
        cancel: &CancellationToken,
        started: Instant,
        warnings: Vec<String>,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let video_id = request.video_id;

        enter(video_id, ProcessingStage::Downloading);
        tokio::fs::create_dir_all(&self.config.temp_dir).await?;
        let download_dir = tempfile::Builder::new()
            .prefix(&format!("download_{video_id}_"))
            .tempdir_in(&self.config.temp_dir)?;
        let source_path = download_dir.path().join(source_file_name(&request.source_key));
        let original_bytes =
            until_cancelled(cancel, self.download(request, &source_path)).await?;
        debug!(video_id = %video_id, bytes = original_bytes, "Source downloaded");

        enter(video_id, ProcessingStage::Probing);
        let info = until_cancelled(cancel, async {
            self.media
                .probe(&source_path)
                .await
                .map_err(PipelineError::Probe)
        })
        .await?;
        info!(
            video_id = %video_id,
            width = info.width,
            height = info.height,
            duration = info.duration_seconds,
            "Source probed"
        );

        let ladder = quality_ladder(info.width, info.height);
        enter(video_id, ProcessingStage::LadderComputed);
        let names: Vec<&str> = ladder.iter().map(|r| r.name.as_str()).collect();
        debug!(video_id = %video_id, renditions = ?names, "Quality ladder computed");

        let mut outcome = ProcessingOutcome::new(video_id, original_bytes);
        outcome.warnings = warnings;

        enter(video_id, ProcessingStage::Dispatching);
        let mut batch = self.pool.open_batch();
        outcome.expected = self
            .dispatch(request, &source_path, ladder, &batch, &mut outcome, cancel)
            .await?;

        enter(video_id, ProcessingStage::Aggregating);
        self.aggregate(&mut batch, &mut outcome, cancel).await?;

        enter(video_id, ProcessingStage::Finalizing);
        let master_manifest_url = match self.publish_master(request, &outcome).await {
            Ok(url) => url,
            Err(e) => {
                warn!(video_id = %video_id, error = %e, "Continuing without master manifest");
                outcome.warn(&e);
                String::new()
            }
        };
        outcome.finalize(master_manifest_url, started.elapsed());

        Ok(outcome)
    }

    async fn download(&self, request: &ProcessRequest, path: &Path) -> Result<u64, PipelineError> {
        let key = &request.source_key;
        let mut reader = self
            .storage
            .get(&request.bucket, key)
            .await
            .map_err(PipelineError::Download)?;

        let io_error = |e: std::io::Error| PipelineError::Download(StorageError::download(key, e));
        let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
        let bytes = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        Ok(bytes)
    }

    /// Submit one job per rendition; returns how many the pool accepted.
    /// Rejected submissions are recorded as failed renditions.
    async fn dispatch(
        &self,
        request: &ProcessRequest,
        source_path: &Path,
        ladder: Vec<Rendition>,
        batch: &JobBatch,
        outcome: &mut ProcessingOutcome,
        cancel: &CancellationToken,
    ) -> Result<usize, PipelineError> {
        let video_id = request.video_id;
        let mut accepted = 0;

        for (i, rendition) in ladder.into_iter().enumerate() {
            let job = Job {
                job_id: Uuid::new_v4(),
                video_id,
                user_id: request.user_id.clone(),
                input_path: source_path.to_path_buf(),
                output_key_prefix: self.layout.rendition_prefix(
                    &request.user_id,
                    video_id,
                    &rendition.name,
                ),
                rendition: rendition.clone(),
                priority: i as u32 + 1,
            };
            let job_id = job.job_id;

            let submitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    batch.cancel();
                    return Err(PipelineError::Cancelled);
                }
                submitted = self.pool.submit_job(job, batch) => submitted,
            };

            match submitted {
                Ok(()) => {
                    accepted += 1;
                    debug!(video_id = %video_id, job_id = %job_id, rendition = %rendition.name, "Job submitted");
                }
                Err(e) => {
                    warn!(video_id = %video_id, job_id = %job_id, rendition = %rendition.name, error = %e, "Job not accepted");
                    outcome.record_failure(rendition, &e);
                }
            }
        }

        info!(video_id = %video_id, accepted, "Jobs dispatched");
        Ok(accepted)
    }

    /// Drain the batch until every accepted job reported, the deadline
    /// passes or `cancel` fires.
    async fn aggregate(
        &self,
        batch: &mut JobBatch,
        outcome: &mut ProcessingOutcome,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let video_id = outcome.video_id;
        let expected = outcome.expected;
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.config.aggregation_timeout);
        tokio::pin!(deadline);

        let mut completed = 0;
        while completed < expected {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(video_id = %video_id, completed, expected, "Processing cancelled");
                    batch.cancel();
                    return Err(PipelineError::Cancelled);
                }
                _ = &mut deadline => {
                    let timeout = PipelineError::Timeout {
                        completed,
                        expected,
                        elapsed_secs: started.elapsed().as_secs(),
                    };
                    warn!(video_id = %video_id, error = %timeout, "Aggregation timed out");
                    outcome.warn(&timeout);
                    batch.cancel();
                    break;
                }
                result = batch.recv() => {
                    let Some(result) = result else { break };
                    completed += 1;
                    match result.error() {
                        None => info!(
                            video_id = %video_id,
                            rendition = %result.rendition.name,
                            elapsed_ms = result.elapsed.as_millis() as u64,
                            "Rendition ready ({completed}/{expected})"
                        ),
                        Some(e) => warn!(
                            video_id = %video_id,
                            rendition = %result.rendition.name,
                            error = %e,
                            "Rendition failed ({completed}/{expected})"
                        ),
                    }
                    outcome.record(result);
                }
            }
        }

        Ok(())
    }

    /// Upload the master manifest listing every produced rendition in
    /// completion order.
    async fn publish_master(
        &self,
        request: &ProcessRequest,
        outcome: &ProcessingOutcome,
    ) -> Result<String, PipelineError> {
        if outcome.renditions.is_empty() {
            return Err(PipelineError::Manifest(
                "no rendition was produced".to_string(),
            ));
        }

        let master =
            MasterPlaylist::from_renditions(outcome.renditions.iter().map(|p| &p.rendition));
        let key = self
            .layout
            .master_manifest_key(&request.user_id, request.video_id);
        let metadata = HashMap::from([
            ("processed-at".to_string(), Utc::now().to_rfc3339()),
            ("processor".to_string(), PROCESSOR_NAME.to_string()),
        ]);

        self.storage
            .put(
                &self.config.output_bucket,
                &key,
                ObjectBody::Bytes(Bytes::from(master.render())),
                content_type_for(&key),
                &metadata,
            )
            .await
            .map_err(|e| PipelineError::Manifest(e.to_string()))
    }
}

fn enter(video_id: Uuid, stage: ProcessingStage) {
    debug!(video_id = %video_id, stage = %stage, "Stage");
}

/// Local file name of the downloaded source, keeping the key's extension.
fn source_file_name(source_key: &str) -> String {
    let extension = Path::new(source_key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4");
    format!("original.{extension}")
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = work => result,
    }
}

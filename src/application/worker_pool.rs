//! Fixed-size pool of transcoding workers shared by every video.
//!
//! Workers pull from one bounded MPMC queue. Each video talks to the pool
//! through its own [`JobBatch`], which carries the result channel and the
//! cancellation token for that video's jobs.

use crate::config::PipelineConfig;
use crate::domain::hls::MEDIA_PLAYLIST_NAME;
use crate::domain::jobs::{Job, JobResult, RenditionOutput};
use crate::error::{JobError, StorageError, SubmitError};
use crate::ports::media::MediaToolPort;
use crate::ports::storage::{content_type_for, ObjectBody, StoragePort};
use async_channel::TrySendError;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Value of the `processor` metadata on uploaded files.
pub const PROCESSOR_NAME: &str = "abr-pipeline-worker";

struct QueuedJob {
    job: Job,
    results: mpsc::Sender<JobResult>,
    cancel: CancellationToken,
}

/// One video's handle on the pool: where its results arrive and how its
/// in-flight jobs are torn down.
pub struct JobBatch {
    sender: mpsc::Sender<JobResult>,
    receiver: mpsc::Receiver<JobResult>,
    cancel: CancellationToken,
}

impl JobBatch {
    /// Next result of this batch. Never yields results of other batches.
    pub async fn recv(&mut self) -> Option<JobResult> {
        self.receiver.recv().await
    }

    /// Kill every in-flight transcode of this batch. Queued jobs are
    /// reported as cancelled without running.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for JobBatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Shared<S, M> {
    storage: Arc<S>,
    media: Arc<M>,
    output_bucket: String,
    temp_dir: PathBuf,
}

pub struct WorkerPool<S, M> {
    shared: Arc<Shared<S, M>>,
    worker_count: usize,
    capacity: usize,
    submit_wait: Duration,
    sender: async_channel::Sender<QueuedJob>,
    receiver: async_channel::Receiver<QueuedJob>,
    shutdown: CancellationToken,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, M> WorkerPool<S, M>
where
    S: StoragePort + 'static,
    M: MediaToolPort + 'static,
{
    pub fn new(storage: Arc<S>, media: Arc<M>, config: &PipelineConfig) -> Self {
        let capacity = config.queue_capacity().max(1);
        let (sender, receiver) = async_channel::bounded(capacity);

        Self {
            shared: Arc::new(Shared {
                storage,
                media,
                output_bucket: config.output_bucket.clone(),
                temp_dir: config.temp_dir.clone(),
            }),
            worker_count: config.worker_count.max(1),
            capacity,
            submit_wait: config.submit_wait,
            sender,
            receiver,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers. Calling it again is a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.worker_count {
            let shared = self.shared.clone();
            let receiver = self.receiver.clone();
            handles.push(tokio::spawn(run_worker(worker_id, shared, receiver)));
        }
        info!(
            workers = self.worker_count,
            capacity = self.capacity,
            "Worker pool started"
        );
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Jobs waiting in the queue, across all batches.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }

    /// Open a result channel for one video.
    pub fn open_batch(&self) -> JobBatch {
        let (sender, receiver) = mpsc::channel(self.capacity);
        JobBatch {
            sender,
            receiver,
            cancel: self.shutdown.child_token(),
        }
    }

    /// Enqueue a job for `batch`.
    ///
    /// Tries a non-blocking enqueue first, then waits up to the configured
    /// backpressure window. `Ok` means the job will produce exactly one
    /// result on the batch; `Err` means it never runs.
    pub async fn submit_job(&self, job: Job, batch: &JobBatch) -> Result<(), SubmitError> {
        let job_id = job.job_id;
        if self.shutdown.is_cancelled() {
            return Err(SubmitError::Closed(job_id));
        }

        let queued = QueuedJob {
            job,
            results: batch.sender.clone(),
            cancel: batch.cancel.clone(),
        };

        match self.sender.try_send(queued) {
            Ok(()) => {
                debug!(job_id = %job_id, "Job queued");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SubmitError::Closed(job_id)),
            Err(TrySendError::Full(queued)) => {
                warn!(
                    job_id = %job_id,
                    wait_secs = self.submit_wait.as_secs(),
                    "Job queue full, waiting"
                );
                match tokio::time::timeout(self.submit_wait, self.sender.send(queued)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SubmitError::Closed(job_id)),
                    Err(_) => {
                        warn!(job_id = %job_id, "Job dropped, queue still full");
                        Err(SubmitError::QueueFull(job_id))
                    }
                }
            }
        }
    }

    /// Close the queue and wait for workers to finish what is queued and in
    /// flight. Safe to call more than once; concurrent callers all wait for
    /// the workers to exit.
    pub async fn stop(&self) {
        self.sender.close();
        // Held across the join so a second caller blocks until it completes.
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return;
        }

        for result in join_all(handles.drain(..)).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }

    /// Like [`stop`](Self::stop), but cancels every in-flight transcode first.
    pub async fn shutdown_now(&self) {
        self.shutdown.cancel();
        self.stop().await;
    }
}

async fn run_worker<S, M>(
    worker_id: usize,
    shared: Arc<Shared<S, M>>,
    receiver: async_channel::Receiver<QueuedJob>,
) where
    S: StoragePort,
    M: MediaToolPort,
{
    debug!(worker_id, "Worker started");

    while let Ok(queued) = receiver.recv().await {
        let QueuedJob {
            job,
            results,
            cancel,
        } = queued;

        let result = run_job(worker_id, &shared, &job, &cancel).await;
        match &result.outcome {
            Ok(output) => info!(
                worker_id,
                job_id = %job.job_id,
                video_id = %job.video_id,
                rendition = %job.rendition.name,
                segments = output.segment_count,
                bytes = output.output_bytes,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Rendition completed"
            ),
            Err(e) => warn!(
                worker_id,
                job_id = %job.job_id,
                video_id = %job.video_id,
                rendition = %job.rendition.name,
                error = %e,
                "Rendition failed"
            ),
        }

        deliver(results, result, &cancel).await;
    }

    debug!(worker_id, "Worker exiting, queue closed");
}

/// Hand a result back to its batch. A cancelled batch may have stopped
/// draining, so waiting on a full channel gives up once it is cancelled.
async fn deliver(results: mpsc::Sender<JobResult>, result: JobResult, cancel: &CancellationToken) {
    let job_id = result.job_id;
    let sent = match results.try_send(result) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
        Err(mpsc::error::TrySendError::Full(result)) => tokio::select! {
            sent = results.send(result) => sent.is_ok(),
            _ = cancel.cancelled() => false,
        },
    };

    if !sent {
        debug!(job_id = %job_id, "Result discarded, batch no longer listening");
    }
}

async fn run_job<S, M>(
    worker_id: usize,
    shared: &Shared<S, M>,
    job: &Job,
    cancel: &CancellationToken,
) -> JobResult
where
    S: StoragePort,
    M: MediaToolPort,
{
    let started = Instant::now();
    let outcome = if cancel.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        transcode_and_upload(worker_id, shared, job, cancel).await
    };

    JobResult {
        job_id: job.job_id,
        video_id: job.video_id,
        rendition: job.rendition.clone(),
        elapsed: started.elapsed(),
        outcome: outcome.map_err(|e| e.to_string()),
    }
}

async fn transcode_and_upload<S, M>(
    worker_id: usize,
    shared: &Shared<S, M>,
    job: &Job,
    cancel: &CancellationToken,
) -> Result<RenditionOutput, JobError>
where
    S: StoragePort,
    M: MediaToolPort,
{
    tokio::fs::create_dir_all(&shared.temp_dir)
        .await
        .map_err(JobError::Workspace)?;
    let workdir = tempfile::Builder::new()
        .prefix(&format!("worker_{}_{}_", worker_id, job.job_id))
        .tempdir_in(&shared.temp_dir)
        .map_err(JobError::Workspace)?;

    info!(
        worker_id,
        job_id = %job.job_id,
        rendition = %job.rendition.name,
        "Transcoding rendition"
    );
    let output = shared
        .media
        .transcode(&job.input_path, &job.rendition, workdir.path(), cancel)
        .await?;

    let metadata = HashMap::from([
        ("processed-at".to_string(), Utc::now().to_rfc3339()),
        ("processor".to_string(), format!("{PROCESSOR_NAME}-{worker_id}")),
    ]);

    // Segments go first so the playlist never points at a missing object.
    let mut output_bytes = 0;
    for segment in &output.segments {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let (_, size) = upload_file(shared, job, segment, &metadata).await?;
        output_bytes += size;
    }

    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    let (playlist_url, size) = upload_file(shared, job, &output.playlist, &metadata).await?;
    output_bytes += size;

    Ok(RenditionOutput {
        playlist_key: format!("{}/{}", job.output_key_prefix, MEDIA_PLAYLIST_NAME),
        playlist_url,
        segment_count: output.segments.len(),
        output_bytes,
    })
}

/// Upload one produced file under the job's prefix; returns its URL and size.
async fn upload_file<S, M>(
    shared: &Shared<S, M>,
    job: &Job,
    path: &Path,
    metadata: &HashMap<String, String>,
) -> Result<(String, u64), JobError>
where
    S: StoragePort,
    M: MediaToolPort,
{
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::upload(path.display().to_string(), "unnamed output file"))?;
    let key = format!("{}/{}", job.output_key_prefix, file_name);

    let size = tokio::fs::metadata(path)
        .await
        .map_err(|e| StorageError::upload(key.clone(), e))?
        .len();

    let url = shared
        .storage
        .put(
            &shared.output_bucket,
            &key,
            ObjectBody::File(path.to_path_buf()),
            content_type_for(file_name),
            metadata,
        )
        .await?;

    Ok((url, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::fs::FsAdapter;
    use crate::domain::ladder::quality_ladder;
    use crate::ports::storage::MockStoragePort;
    use crate::testing::FakeMediaTool;
    use uuid::Uuid;

    fn config(temp: &Path, workers: usize) -> PipelineConfig {
        PipelineConfig {
            output_bucket: "out".to_string(),
            temp_dir: temp.join("work"),
            worker_count: workers,
            submit_wait: Duration::from_millis(50),
            ..PipelineConfig::default()
        }
    }

    fn jobs_for(video_id: Uuid, source: &Path) -> Vec<Job> {
        quality_ladder(1920, 1080)
            .into_iter()
            .enumerate()
            .map(|(i, rendition)| Job {
                job_id: Uuid::new_v4(),
                video_id,
                user_id: "u1".to_string(),
                input_path: source.to_path_buf(),
                output_key_prefix: format!("p/u1/{video_id}/hls/{}", rendition.name),
                rendition,
                priority: i as u32 + 1,
            })
            .collect()
    }

    async fn drain(batch: &mut JobBatch, expected: usize) -> Vec<JobResult> {
        let mut results = Vec::new();
        while results.len() < expected {
            let result = tokio::time::timeout(Duration::from_secs(5), batch.recv())
                .await
                .expect("result in time")
                .expect("batch open");
            results.push(result);
        }
        results
    }

    #[tokio::test]
    async fn every_accepted_job_yields_one_result() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        let media = Arc::new(FakeMediaTool::new());
        let pool = WorkerPool::new(storage.clone(), media, &config(dir.path(), 2));
        pool.start().await;

        let video_id = Uuid::new_v4();
        let mut batch = pool.open_batch();
        let jobs = jobs_for(video_id, &dir.path().join("source.mp4"));
        let expected = jobs.len();
        for job in jobs {
            pool.submit_job(job, &batch).await.unwrap();
        }

        let results = drain(&mut batch, expected).await;
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.is_success() && r.video_id == video_id));
        assert!(results.iter().all(|r| r.segment_count() == 3));

        let playlist_key = format!("p/u1/{video_id}/hls/720p/playlist.m3u8");
        assert!(storage.exists("out", &playlist_key).await.unwrap());
        let meta = storage.metadata("out", &playlist_key).await.unwrap();
        assert_eq!(meta["content-type"], "application/x-mpegURL");
        assert!(meta.contains_key("processed-at"));
        assert!(meta["processor"].starts_with(PROCESSOR_NAME));

        pool.stop().await;
    }

    #[tokio::test]
    async fn failed_transcode_does_not_affect_other_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        let media = Arc::new(FakeMediaTool::new().failing("480p"));
        let pool = WorkerPool::new(storage, media, &config(dir.path(), 4));
        pool.start().await;

        let mut batch = pool.open_batch();
        for job in jobs_for(Uuid::new_v4(), &dir.path().join("source.mp4")) {
            pool.submit_job(job, &batch).await.unwrap();
        }

        let results = drain(&mut batch, 4).await;
        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].rendition.name, "480p");
        assert!(failed[0].error().unwrap().contains("scripted failure"));

        pool.stop().await;
    }

    #[tokio::test]
    async fn upload_failures_are_job_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = MockStoragePort::new();
        storage
            .expect_put()
            .returning(|_, key, _, _, _| Err(StorageError::upload(key, "bucket on fire")));
        let pool = WorkerPool::new(
            Arc::new(storage),
            Arc::new(FakeMediaTool::new()),
            &config(dir.path(), 1),
        );
        pool.start().await;

        let mut batch = pool.open_batch();
        let job = jobs_for(Uuid::new_v4(), &dir.path().join("source.mp4")).remove(0);
        pool.submit_job(job, &batch).await.unwrap();

        let result = drain(&mut batch, 1).await.remove(0);
        assert!(result.error().unwrap().contains("bucket on fire"));
        pool.stop().await;
    }

    #[tokio::test]
    async fn results_are_routed_to_their_own_batch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        let pool = WorkerPool::new(storage, Arc::new(FakeMediaTool::new()), &config(dir.path(), 2));
        pool.start().await;

        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let mut first_batch = pool.open_batch();
        let mut second_batch = pool.open_batch();
        let source = dir.path().join("source.mp4");
        for (a, b) in jobs_for(first, &source).into_iter().zip(jobs_for(second, &source)) {
            pool.submit_job(a, &first_batch).await.unwrap();
            pool.submit_job(b, &second_batch).await.unwrap();
        }

        let first_results = drain(&mut first_batch, 4).await;
        let second_results = drain(&mut second_batch, 4).await;
        assert!(first_results.iter().all(|r| r.video_id == first));
        assert!(second_results.iter().all(|r| r.video_id == second));

        pool.stop().await;
    }

    #[tokio::test]
    async fn full_queue_drops_after_backpressure_wait() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        // Not started: nothing drains the queue of capacity 2.
        let pool = WorkerPool::new(storage, Arc::new(FakeMediaTool::new()), &config(dir.path(), 1));
        let batch = pool.open_batch();

        let mut jobs = jobs_for(Uuid::new_v4(), &dir.path().join("source.mp4")).into_iter();
        pool.submit_job(jobs.next().unwrap(), &batch).await.unwrap();
        pool.submit_job(jobs.next().unwrap(), &batch).await.unwrap();

        let third = jobs.next().unwrap();
        let third_id = third.job_id;
        let started = Instant::now();
        assert_eq!(
            pool.submit_job(third, &batch).await,
            Err(SubmitError::QueueFull(third_id))
        );
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(pool.queued(), 2);
    }

    #[tokio::test]
    async fn full_queue_accepts_jobs_once_workers_catch_up() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        let media = Arc::new(FakeMediaTool::new().with_delay(Duration::from_millis(30)));
        let patient = PipelineConfig {
            submit_wait: Duration::from_secs(2),
            ..config(dir.path(), 1)
        };
        let pool = WorkerPool::new(storage, media, &patient);
        pool.start().await;

        let video_id = Uuid::new_v4();
        let source = dir.path().join("source.mp4");
        let jobs: Vec<Job> = quality_ladder(3840, 2160)
            .into_iter()
            .map(|rendition| Job {
                job_id: Uuid::new_v4(),
                video_id,
                user_id: "u1".to_string(),
                input_path: source.clone(),
                output_key_prefix: format!("p/u1/{video_id}/hls/{}", rendition.name),
                rendition,
                priority: 1,
            })
            .collect();
        assert_eq!(jobs.len(), 5);

        // One worker and a queue of two: later submissions must wait.
        let mut batch = pool.open_batch();
        for job in jobs {
            pool.submit_job(job, &batch).await.unwrap();
        }

        let results = drain(&mut batch, 5).await;
        assert!(results.iter().all(|r| r.is_success() && r.video_id == video_id));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), batch.recv())
                .await
                .is_err(),
            "no result beyond one per job"
        );

        pool.stop().await;
    }

    #[tokio::test]
    async fn concurrent_stops_both_wait_for_in_flight_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        let media = Arc::new(FakeMediaTool::new().with_delay(Duration::from_millis(200)));
        let pool = Arc::new(WorkerPool::new(storage, media, &config(dir.path(), 1)));
        pool.start().await;

        let mut batch = pool.open_batch();
        let job = jobs_for(Uuid::new_v4(), &dir.path().join("source.mp4")).remove(0);
        pool.submit_job(job, &batch).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first = tokio::spawn({
            let pool = pool.clone();
            async move { pool.stop().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(5), pool.stop())
            .await
            .expect("second stop returns");

        // The second caller only returns after the worker delivered.
        let result = batch.receiver.try_recv().expect("result delivered before stop returned");
        assert!(result.is_success());
        first.await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_rejects_new_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        let pool = WorkerPool::new(storage, Arc::new(FakeMediaTool::new()), &config(dir.path(), 2));
        pool.start().await;

        pool.stop().await;
        pool.stop().await;
        pool.shutdown_now().await;

        let batch = pool.open_batch();
        let job = jobs_for(Uuid::new_v4(), &dir.path().join("source.mp4")).remove(0);
        let job_id = job.job_id;
        assert_eq!(
            pool.submit_job(job, &batch).await,
            Err(SubmitError::Closed(job_id))
        );
    }

    #[tokio::test]
    async fn cancelling_a_batch_kills_in_flight_transcodes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        let media = Arc::new(FakeMediaTool::new().with_delay(Duration::from_secs(30)));
        let pool = WorkerPool::new(storage, media, &config(dir.path(), 2));
        pool.start().await;

        let mut batch = pool.open_batch();
        for job in jobs_for(Uuid::new_v4(), &dir.path().join("source.mp4")).into_iter().take(2) {
            pool.submit_job(job, &batch).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        batch.cancel();

        let results = drain(&mut batch, 2).await;
        assert!(results.iter().all(|r| !r.is_success()));
        assert!(results.iter().all(|r| r.error().unwrap().contains("cancelled")));

        tokio::time::timeout(Duration::from_secs(5), pool.stop())
            .await
            .expect("workers exit promptly");
    }

    #[tokio::test]
    async fn work_dirs_are_removed_after_each_job() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        let pool = WorkerPool::new(storage, Arc::new(FakeMediaTool::new()), &config(dir.path(), 1));
        pool.start().await;

        let mut batch = pool.open_batch();
        let job = jobs_for(Uuid::new_v4(), &dir.path().join("source.mp4")).remove(0);
        pool.submit_job(job, &batch).await.unwrap();
        drain(&mut batch, 1).await;
        pool.stop().await;

        let mut entries = tokio::fs::read_dir(dir.path().join("work")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}

//! Error types for every layer of the pipeline.
//!
//! Collaborator failures ([`StorageError`], [`MediaError`], [`RepositoryError`])
//! are job-scoped or video-scoped depending on where they surface; the
//! orchestrator lifts the video-fatal ones into [`PipelineError`].

use thiserror::Error;
use uuid::Uuid;

/// Failures of the object storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Download failed for {key}: {message}")]
    Download { key: String, message: String },

    #[error("Upload failed for {key}: {message}")]
    Upload { key: String, message: String },

    #[error("Presign failed for {key}: {message}")]
    Presign { key: String, message: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn download(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Download {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn upload(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Upload {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

/// Failures of the external prober/encoder.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(&'static str),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Invalid media metadata: {0}")]
    InvalidMetadata(String),

    #[error("Transcode failed: {0}")]
    Transcode(String),

    #[error("Transcode output incomplete: {0}")]
    Incomplete(String),

    #[error("Transcode cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the persistence collaborator.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Video record not found: {0}")]
    NotFound(Uuid),

    #[error("Repository backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Job-scoped failure inside a worker. Flattened to text on the `JobResult`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Failed to prepare work dir: {0}")]
    Workspace(#[source] std::io::Error),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Job cancelled")]
    Cancelled,
}

/// Failures of playback URL resolution.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Video not found: {0}")]
    NotFound(Uuid),

    #[error("Video {0} does not belong to the requesting user")]
    Forbidden(Uuid),

    #[error("Video {video_id} is not ready for playback: {reason}")]
    NotReady { video_id: Uuid, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Outcome of a rejected worker pool submission. The job never runs and
/// never produces a result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Job queue full, job {0} dropped after backpressure wait")]
    QueueFull(Uuid),

    #[error("Worker pool is shut down, job {0} rejected")]
    Closed(Uuid),
}

impl SubmitError {
    pub fn job_id(&self) -> Uuid {
        match self {
            SubmitError::QueueFull(id) | SubmitError::Closed(id) => *id,
        }
    }
}

/// Video-scoped failures of `process_video`, plus the non-fatal conditions
/// that finish as warnings on the outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to download source: {0}")]
    Download(#[source] StorageError),

    #[error("Failed to probe source: {0}")]
    Probe(#[source] MediaError),

    #[error("Master manifest not published: {0}")]
    Manifest(String),

    #[error("Aggregation timed out after {elapsed_secs}s with {completed}/{expected} renditions reported")]
    Timeout {
        completed: usize,
        expected: usize,
        elapsed_secs: u64,
    },

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Video {0} is already being processed")]
    AlreadyProcessing(Uuid),

    #[error("Processing task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid or missing configuration at process start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} env var required")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

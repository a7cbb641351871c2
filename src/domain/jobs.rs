use super::ladder::Rendition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Entry parameters handed over by the upload side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    /// Bucket holding the uploaded source
    pub bucket: String,
    pub source_key: String,
    pub video_id: Uuid,
    pub user_id: String,
}

/// Transcoding of one rendition of one video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub video_id: Uuid,
    pub user_id: String,
    /// Local path of the downloaded source
    pub input_path: PathBuf,
    pub rendition: Rendition,
    /// Every produced file lands at `<output_key_prefix>/<filename>`
    pub output_key_prefix: String,
    /// Submission rank within the video, 1-based
    pub priority: u32,
}

/// What a successful job left in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenditionOutput {
    pub playlist_key: String,
    pub playlist_url: String,
    pub segment_count: usize,
    pub output_bytes: u64,
}

/// Produced exactly once per accepted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub video_id: Uuid,
    pub rendition: Rendition,
    pub elapsed: Duration,
    /// Error text on failure
    pub outcome: Result<RenditionOutput, String>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().err().map(String::as_str)
    }

    pub fn segment_count(&self) -> usize {
        self.outcome.as_ref().map(|o| o.segment_count).unwrap_or(0)
    }

    pub fn output_bytes(&self) -> u64 {
        self.outcome.as_ref().map(|o| o.output_bytes).unwrap_or(0)
    }
}

/// Lifecycle of a video record: `uploaded → processing → completed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(VideoStatus::Uploaded),
            "processing" => Ok(VideoStatus::Processing),
            "completed" => Ok(VideoStatus::Completed),
            "failed" => Ok(VideoStatus::Failed),
            other => Err(format!("unknown video status: {other}")),
        }
    }
}

/// A rendition that made it into storage, as persisted with the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedRendition {
    pub rendition: Rendition,
    #[serde(flatten)]
    pub output: RenditionOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenditionFailure {
    pub rendition: Rendition,
    pub error: String,
}

/// Video-level summary, built while results arrive and frozen once
/// aggregation ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub video_id: Uuid,
    pub status: VideoStatus,
    pub original_bytes: u64,
    /// Renditions in completion order
    pub renditions: Vec<ProducedRendition>,
    pub failures: Vec<RenditionFailure>,
    /// Jobs the pool accepted
    pub expected: usize,
    pub total_bytes: u64,
    pub compression_ratio: f64,
    /// Empty when no master manifest was published
    pub master_manifest_url: String,
    pub elapsed: Duration,
    pub warnings: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

impl ProcessingOutcome {
    pub fn new(video_id: Uuid, original_bytes: u64) -> Self {
        Self {
            video_id,
            status: VideoStatus::Processing,
            original_bytes,
            renditions: Vec::new(),
            failures: Vec::new(),
            expected: 0,
            total_bytes: 0,
            compression_ratio: 0.0,
            master_manifest_url: String::new(),
            elapsed: Duration::ZERO,
            warnings: Vec::new(),
            processed_at: Utc::now(),
        }
    }

    /// Fold one job result in. Failures are kept aside and never listed.
    pub fn record(&mut self, result: JobResult) {
        match result.outcome {
            Ok(output) => {
                self.total_bytes += output.output_bytes;
                self.renditions.push(ProducedRendition {
                    rendition: result.rendition,
                    output,
                });
            }
            Err(error) => self.failures.push(RenditionFailure {
                rendition: result.rendition,
                error,
            }),
        }
    }

    pub fn record_failure(&mut self, rendition: Rendition, error: impl ToString) {
        self.failures.push(RenditionFailure {
            rendition,
            error: error.to_string(),
        });
    }

    pub fn warn(&mut self, warning: impl ToString) {
        self.warnings.push(warning.to_string());
    }

    /// Freeze the outcome as completed.
    pub fn finalize(&mut self, master_manifest_url: String, elapsed: Duration) {
        self.master_manifest_url = master_manifest_url;
        self.compression_ratio = compression_ratio(self.total_bytes, self.original_bytes);
        self.elapsed = elapsed;
        self.processed_at = Utc::now();
        self.status = VideoStatus::Completed;
    }

    pub fn summary(&self) -> String {
        format!(
            "Parallel processing completed: {}/{} renditions",
            self.renditions.len(),
            self.expected
        )
    }
}

/// `total / original`, or 0 when the original size is unknown.
pub fn compression_ratio(total_bytes: u64, original_bytes: u64) -> f64 {
    if original_bytes == 0 {
        return 0.0;
    }
    total_bytes as f64 / original_bytes as f64
}

/// The externally owned video record, as seen through the repository port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: Uuid,
    pub storage_key: String,
    pub user_id: String,
    pub status: VideoStatus,
    #[serde(default)]
    pub master_manifest_url: String,
    #[serde(default)]
    pub renditions: Vec<ProducedRendition>,
}

impl VideoRecord {
    /// A freshly uploaded video, before any processing.
    pub fn uploaded(id: Uuid, storage_key: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            id,
            storage_key: storage_key.into(),
            user_id: user_id.into(),
            status: VideoStatus::Uploaded,
            master_manifest_url: String::new(),
            renditions: Vec::new(),
        }
    }
}

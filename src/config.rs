//! Configuration for the pipeline and its deployment environments.
//!
//! Built once at process start and passed down explicitly.

use crate::error::ConfigError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Settings shared by every deployment of the pipeline.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Bucket receiving renditions and master manifests
    pub output_bucket: String,
    /// Storage region, used to build public object URLs
    pub region: String,
    /// Leading key segment of every produced object
    pub key_prefix: String,
    /// Overrides the region-derived object URL base when set
    pub public_base_url: Option<String>,
    /// Root for per-video download dirs and per-job work dirs
    pub temp_dir: PathBuf,
    /// Number of long-lived transcoding workers
    pub worker_count: usize,
    /// How long a submission may wait on a full queue before the job is dropped
    pub submit_wait: Duration,
    /// Upper bound on waiting for a video's results
    pub aggregation_timeout: Duration,
    /// Target HLS segment length in seconds
    pub segment_seconds: u32,
    /// Lifetime of presigned playback URLs
    pub presign_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_bucket: String::from("videos"),
            region: String::from("us-east-1"),
            key_prefix: String::from("adaptive-bitrate-streaming-videos"),
            public_base_url: None,
            temp_dir: env::temp_dir().join("video-processing"),
            worker_count: 4,
            submit_wait: Duration::from_secs(10),
            aggregation_timeout: Duration::from_secs(15 * 60),
            segment_seconds: 6,
            presign_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let worker_count = parsed("WORKER_COUNT", defaults.worker_count)?;
        if worker_count == 0 {
            return Err(ConfigError::Invalid {
                key: "WORKER_COUNT",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            output_bucket: env::var("S3_BUCKET").unwrap_or(defaults.output_bucket),
            region: env::var("AWS_REGION").unwrap_or(defaults.region),
            key_prefix: env::var("KEY_PREFIX").unwrap_or(defaults.key_prefix),
            public_base_url: env::var("PUBLIC_BASE_URL").ok().filter(|s| !s.is_empty()),
            temp_dir: env::var("TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            worker_count,
            submit_wait: Duration::from_secs(parsed("SUBMIT_WAIT_SECS", 10)?),
            aggregation_timeout: Duration::from_secs(parsed("AGGREGATION_TIMEOUT_SECS", 900)?),
            segment_seconds: parsed("HLS_SEGMENT_SECONDS", defaults.segment_seconds)?,
            presign_ttl: Duration::from_secs(parsed("PRESIGN_TTL_SECS", 86_400)?),
        })
    }

    /// Capacity of the job queue and of each result channel.
    pub fn queue_capacity(&self) -> usize {
        self.worker_count * 2
    }
}

/// Configuration for local/monolith deployment.
#[cfg(feature = "local")]
#[derive(Clone, Debug)]
pub struct LocalConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Directory holding one sub-directory per bucket
    pub storage_root: PathBuf,
}

#[cfg(feature = "local")]
impl LocalConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| String::from("redis://127.0.0.1/")),
            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./storage")),
        }
    }
}

/// Configuration for AWS deployment.
#[cfg(feature = "aws")]
#[derive(Clone, Debug)]
pub struct AwsConfig {
    /// DynamoDB table holding video records
    pub dynamodb_table: String,
}

#[cfg(feature = "aws")]
impl AwsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Ok(Self {
            dynamodb_table: env::var("DYNAMODB_TABLE")
                .map_err(|_| ConfigError::Missing("DYNAMODB_TABLE"))?,
        })
    }
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

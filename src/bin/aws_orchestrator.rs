//! AWS Orchestrator Binary
//!
//! Processes one uploaded video end to end: downloads the source from S3,
//! transcodes every rendition with the local ffmpeg, publishes the HLS tree
//! and records the outcome in DynamoDB. Meant to run as a one-shot task
//! started per upload.
//!
//! Environment Variables:
//! - VIDEO_ID, SOURCE_KEY, USER_ID: the uploaded video
//! - SOURCE_BUCKET: bucket holding the upload (defaults to S3_BUCKET)
//! - S3_BUCKET, AWS_REGION, DYNAMODB_TABLE and the pipeline tuning knobs

use abr_pipeline::adapters::aws::{DynamoAdapter, S3Adapter};
use abr_pipeline::adapters::media::FfmpegTool;
use abr_pipeline::application::orchestrator::OrchestratorService;
use abr_pipeline::application::worker_pool::WorkerPool;
use abr_pipeline::config::{AwsConfig, PipelineConfig};
use abr_pipeline::domain::jobs::{ProcessRequest, VideoRecord};
use abr_pipeline::error::ConfigError;
use abr_pipeline::ports::repository::VideoRepository;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Video processing failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = PipelineConfig::from_env()?;
    let aws = AwsConfig::from_env()?;
    let request = request_from_env(&config)?;

    // Load AWS config
    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    // Create adapters
    let storage = Arc::new(
        S3Adapter::new(aws_sdk_s3::Client::new(&sdk_config), config.region.clone())
            .with_public_base_url(config.public_base_url.clone()),
    );
    let repo = Arc::new(DynamoAdapter::new(
        aws_sdk_dynamodb::Client::new(&sdk_config),
        aws.dynamodb_table,
    ));
    let media = Arc::new(FfmpegTool::new(config.segment_seconds));
    media.check_available().await?;

    if repo.get_video_record(request.video_id).await?.is_none() {
        warn!(video_id = %request.video_id, "No video record, creating one");
        repo.put_video_record(&VideoRecord::uploaded(
            request.video_id,
            request.source_key.clone(),
            request.user_id.clone(),
        ))
        .await?;
    }

    let pool = Arc::new(WorkerPool::new(storage.clone(), media.clone(), &config));
    pool.start().await;
    let orchestrator = OrchestratorService::new(storage, media, pool.clone(), repo, config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling video");
            on_signal.cancel();
        }
    });

    let result = orchestrator.process_video(&request, &cancel).await;
    pool.shutdown_now().await;

    let outcome = result?;
    info!(
        video_id = %outcome.video_id,
        manifest = %outcome.master_manifest_url,
        summary = %outcome.summary(),
        "Video processed"
    );
    Ok(())
}

fn request_from_env(config: &PipelineConfig) -> Result<ProcessRequest, ConfigError> {
    let required = |key: &'static str| std::env::var(key).map_err(|_| ConfigError::Missing(key));

    let raw_id = required("VIDEO_ID")?;
    let video_id = Uuid::parse_str(&raw_id).map_err(|_| ConfigError::Invalid {
        key: "VIDEO_ID",
        value: raw_id.clone(),
    })?;

    Ok(ProcessRequest {
        bucket: std::env::var("SOURCE_BUCKET").unwrap_or_else(|_| config.output_bucket.clone()),
        source_key: required("SOURCE_KEY")?,
        video_id,
        user_id: required("USER_ID")?,
    })
}

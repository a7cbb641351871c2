//! Monolith Binary - single-host deployment.
//!
//! Wires the filesystem store, Redis video records and a local ffmpeg into one
//! pipeline. Upload events arrive as JSON lines on stdin, for example:
//!
//! ```text
//! {"SourceUploaded":{"bucket":"uploads","source_key":"u1/a.mp4","video_id":"…","user_id":"u1"}}
//! ```
//!
//! EOF drains running videos; Ctrl-C cancels them.

use abr_pipeline::adapters::local::events::{self, UploadEvent};
use abr_pipeline::adapters::local::{EventHub, FsAdapter, RedisPool};
use abr_pipeline::adapters::media::FfmpegTool;
use abr_pipeline::application::orchestrator::OrchestratorService;
use abr_pipeline::application::supervisor::ProcessingSupervisor;
use abr_pipeline::application::worker_pool::WorkerPool;
use abr_pipeline::config::{LocalConfig, PipelineConfig};
use abr_pipeline::domain::jobs::VideoRecord;
use abr_pipeline::ports::repository::VideoRepository;
use std::error::Error;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "Monolith failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = PipelineConfig::from_env()?;
    let local = LocalConfig::from_env();

    // 1. Adapters (Local implementations)
    let mut fs = FsAdapter::new(&local.storage_root);
    if let Some(base) = &config.public_base_url {
        fs = fs.with_public_base_url(base.clone());
    }
    let storage = Arc::new(fs);
    let repo = Arc::new(RedisPool::new(&local.redis_url)?);
    let media = Arc::new(FfmpegTool::new(config.segment_seconds));
    media.check_available().await?;

    // 2. Application Services
    let pool = Arc::new(WorkerPool::new(storage.clone(), media.clone(), &config));
    pool.start().await;
    info!(workers = pool.worker_count(), "Started transcoding workers");

    let orchestrator = Arc::new(OrchestratorService::new(
        storage,
        media,
        pool.clone(),
        repo.clone(),
        config,
    ));
    let supervisor = Arc::new(ProcessingSupervisor::new(orchestrator));

    // 3. Event System
    let event_hub = Arc::new(EventHub::new());
    let listener = events::listener::start(event_hub.clone(), supervisor.clone());

    // 4. Upload feed
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break true,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break false };
        if line.trim().is_empty() {
            continue;
        }

        let event: UploadEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed upload event");
                continue;
            }
        };
        register_upload(repo.as_ref(), &event).await?;
        if let Err(e) = event_hub.publish(event) {
            warn!(video_id = %e.0.video_id(), "No listener for upload event");
        }
    };

    // 5. Shutdown
    drop(event_hub);
    listener.await?;
    if interrupted {
        info!("Interrupted, cancelling running videos");
        supervisor.shutdown().await;
        pool.shutdown_now().await;
    } else {
        info!("Upload feed closed, draining running videos");
        supervisor.drain().await;
        pool.stop().await;
    }
    Ok(())
}

/// The upload side owns the record; create it when the feed names a new video.
async fn register_upload(repo: &RedisPool, event: &UploadEvent) -> Result<(), Box<dyn Error>> {
    let UploadEvent::SourceUploaded {
        source_key,
        video_id,
        user_id,
        ..
    } = event;
    if repo.get_video_record(*video_id).await?.is_none() {
        repo.register_video(&VideoRecord::uploaded(*video_id, source_key.clone(), user_id.clone()))
            .await?;
    }
    Ok(())
}

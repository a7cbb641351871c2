//! Scripted collaborators for pipeline tests.

use crate::adapters::local::fs::FsAdapter;
use crate::adapters::local::memory::InMemoryVideoRepository;
use crate::application::orchestrator::OrchestratorService;
use crate::application::worker_pool::WorkerPool;
use crate::config::PipelineConfig;
use crate::domain::hls::{MediaPlaylist, MEDIA_PLAYLIST_NAME};
use crate::domain::jobs::{ProcessRequest, VideoRecord};
use crate::domain::ladder::Rendition;
use crate::domain::probe::MediaInfo;
use crate::error::MediaError;
use crate::ports::media::{MediaToolPort, TranscodeOutput};
use crate::ports::storage::{ObjectBody, StoragePort};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SEGMENTS_PER_RENDITION: usize = 3;

/// Media tool that writes a small fake HLS rendition instead of encoding.
#[derive(Clone)]
pub struct FakeMediaTool {
    info: MediaInfo,
    probe_fails: bool,
    failing: HashSet<String>,
    delay: Duration,
    delays: HashMap<String, Duration>,
    transcodes: Arc<AtomicUsize>,
}

impl FakeMediaTool {
    pub fn new() -> Self {
        Self {
            info: MediaInfo {
                width: 1920,
                height: 1080,
                duration_seconds: 18.0,
                bitrate: "5000000".to_string(),
            },
            probe_fails: false,
            failing: HashSet::new(),
            delay: Duration::ZERO,
            delays: HashMap::new(),
            transcodes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_source(mut self, width: u32, height: u32) -> Self {
        self.info.width = width;
        self.info.height = height;
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    pub fn failing(mut self, rendition: &str) -> Self {
        self.failing.insert(rendition.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_rendition_delay(mut self, rendition: &str, delay: Duration) -> Self {
        self.delays.insert(rendition.to_string(), delay);
        self
    }

    pub fn transcode_count(&self) -> usize {
        self.transcodes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaToolPort for FakeMediaTool {
    async fn probe(&self, _path: &Path) -> Result<MediaInfo, MediaError> {
        if self.probe_fails {
            return Err(MediaError::Probe("scripted probe failure".to_string()));
        }
        Ok(self.info.clone())
    }

    async fn transcode(
        &self,
        _input: &Path,
        rendition: &Rendition,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutput, MediaError> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);

        let delay = self
            .delays
            .get(&rendition.name)
            .copied()
            .unwrap_or(self.delay);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MediaError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        if self.failing.contains(&rendition.name) {
            return Err(MediaError::Transcode(format!(
                "scripted failure for {}",
                rendition.name
            )));
        }

        let mut playlist = MediaPlaylist::new(6);
        let mut segments = Vec::new();
        for i in 0..SEGMENTS_PER_RENDITION {
            let name = format!("segment_{i:03}.ts");
            let path = output_dir.join(&name);
            tokio::fs::write(&path, format!("{} {}", rendition.name, name)).await?;
            playlist.add_segment(6.0, name);
            segments.push(path);
        }

        let playlist_path = output_dir.join(MEDIA_PLAYLIST_NAME);
        playlist.write_to(&playlist_path).await?;

        Ok(TranscodeOutput {
            playlist: playlist_path,
            segments,
        })
    }
}

/// Filesystem storage, in-memory repository and a started pool wired into
/// an orchestrator, with one source object at `uploads/u1/source.mp4`.
pub struct LocalPipeline {
    pub _dir: tempfile::TempDir,
    pub storage: Arc<FsAdapter>,
    pub repo: Arc<InMemoryVideoRepository>,
    pub orchestrator: Arc<OrchestratorService<FsAdapter, FakeMediaTool, InMemoryVideoRepository>>,
}

pub const SOURCE_BUCKET: &str = "uploads";
pub const SOURCE_KEY: &str = "u1/source.mp4";

impl LocalPipeline {
    pub async fn start(media: FakeMediaTool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            output_bucket: "out".to_string(),
            temp_dir: dir.path().join("tmp"),
            ..PipelineConfig::default()
        };
        let storage = Arc::new(FsAdapter::new(dir.path().join("store")));
        storage
            .put(
                SOURCE_BUCKET,
                SOURCE_KEY,
                ObjectBody::Bytes(Bytes::from_static(b"source")),
                "video/mp4",
                &HashMap::new(),
            )
            .await
            .unwrap();

        let media = Arc::new(media);
        let repo = Arc::new(InMemoryVideoRepository::new());
        let pool = Arc::new(WorkerPool::new(storage.clone(), media.clone(), &config));
        pool.start().await;
        let orchestrator = Arc::new(OrchestratorService::new(
            storage.clone(),
            media,
            pool,
            repo.clone(),
            config,
        ));
        Self {
            _dir: dir,
            storage,
            repo,
            orchestrator,
        }
    }

    /// Register a fresh uploaded video for the source object.
    pub async fn request(&self) -> ProcessRequest {
        let video_id = Uuid::new_v4();
        self.repo
            .insert(VideoRecord::uploaded(video_id, SOURCE_KEY, "u1"))
            .await;
        ProcessRequest {
            bucket: SOURCE_BUCKET.to_string(),
            source_key: SOURCE_KEY.to_string(),
            video_id,
            user_id: "u1".to_string(),
        }
    }
}

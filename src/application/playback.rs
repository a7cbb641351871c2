//! Read side of a processed video: turns a completed record into
//! time-limited playlist URLs.

use crate::config::PipelineConfig;
use crate::domain::jobs::{VideoRecord, VideoStatus};
use crate::domain::layout::OutputLayout;
use crate::error::PlaybackError;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::StoragePort;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityStream {
    pub quality: String,
    /// `WxH`
    pub resolution: String,
    pub bandwidth: u64,
    pub playlist_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackInfo {
    pub video_id: Uuid,
    pub master_playlist_url: String,
    pub qualities: Vec<QualityStream>,
}

pub struct PlaybackResolver<S, R> {
    storage: Arc<S>,
    repo: Arc<R>,
    layout: OutputLayout,
    bucket: String,
    ttl: Duration,
}

impl<S, R> PlaybackResolver<S, R>
where
    S: StoragePort,
    R: VideoRepository,
{
    pub fn new(storage: Arc<S>, repo: Arc<R>, config: &PipelineConfig) -> Self {
        Self {
            storage,
            repo,
            layout: OutputLayout::new(config.key_prefix.clone()),
            bucket: config.output_bucket.clone(),
            ttl: config.presign_ttl,
        }
    }

    /// Presigned URLs for a video owned by `user_id`.
    ///
    /// The master playlist must exist. Rendition playlists that are missing
    /// from storage are left out.
    pub async fn resolve(&self, video_id: Uuid, user_id: &str) -> Result<PlaybackInfo, PlaybackError> {
        let record = self
            .repo
            .get_video_record(video_id)
            .await?
            .ok_or(PlaybackError::NotFound(video_id))?;

        if record.user_id != user_id {
            return Err(PlaybackError::Forbidden(video_id));
        }
        check_ready(&record)?;

        let master_key = self.layout.master_manifest_key(&record.user_id, video_id);
        if !self.storage.exists(&self.bucket, &master_key).await? {
            return Err(not_ready(video_id, "master manifest missing from storage"));
        }
        let master_playlist_url = self
            .storage
            .presign_get(&self.bucket, &master_key, self.ttl)
            .await?;

        let mut qualities = Vec::with_capacity(record.renditions.len());
        for produced in &record.renditions {
            let key = &produced.output.playlist_key;
            match self.storage.exists(&self.bucket, key).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(video_id = %video_id, key = %key, "Rendition playlist missing, skipped");
                    continue;
                }
                Err(e) => {
                    warn!(video_id = %video_id, key = %key, error = %e, "Rendition lookup failed, skipped");
                    continue;
                }
            }

            match self.storage.presign_get(&self.bucket, key, self.ttl).await {
                Ok(playlist_url) => qualities.push(QualityStream {
                    quality: produced.rendition.name.clone(),
                    resolution: format!("{}x{}", produced.rendition.width, produced.rendition.height),
                    bandwidth: produced.rendition.bandwidth(),
                    playlist_url,
                }),
                Err(e) => {
                    warn!(video_id = %video_id, key = %key, error = %e, "Presign failed, rendition skipped")
                }
            }
        }

        Ok(PlaybackInfo {
            video_id,
            master_playlist_url,
            qualities,
        })
    }
}

fn check_ready(record: &VideoRecord) -> Result<(), PlaybackError> {
    if record.status != VideoStatus::Completed {
        return Err(not_ready(record.id, format!("status is {}", record.status)));
    }
    if record.master_manifest_url.is_empty() {
        return Err(not_ready(record.id, "no master manifest was published"));
    }
    if record.renditions.is_empty() {
        return Err(not_ready(record.id, "no renditions were produced"));
    }
    Ok(())
}

fn not_ready(video_id: Uuid, reason: impl Into<String>) -> PlaybackError {
    PlaybackError::NotReady {
        video_id,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::fs::FsAdapter;
    use crate::adapters::local::memory::InMemoryVideoRepository;
    use crate::domain::jobs::{ProducedRendition, RenditionOutput};
    use crate::domain::ladder::quality_ladder;
    use crate::ports::storage::ObjectBody;
    use bytes::Bytes;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        storage: Arc<FsAdapter>,
        repo: Arc<InMemoryVideoRepository>,
        resolver: PlaybackResolver<FsAdapter, InMemoryVideoRepository>,
        layout: OutputLayout,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            output_bucket: "out".to_string(),
            ..PipelineConfig::default()
        };
        let storage = Arc::new(FsAdapter::new(dir.path()));
        let repo = Arc::new(InMemoryVideoRepository::new());
        let resolver = PlaybackResolver::new(storage.clone(), repo.clone(), &config);
        Fixture {
            _dir: dir,
            storage,
            repo,
            resolver,
            layout: OutputLayout::new(config.key_prefix),
        }
    }

    async fn put(storage: &FsAdapter, key: &str) {
        storage
            .put(
                "out",
                key,
                ObjectBody::Bytes(Bytes::from_static(b"#EXTM3U\n")),
                "application/x-mpegURL",
                &HashMap::new(),
            )
            .await
            .unwrap();
    }

    /// Completed record with 240p and 720p produced; only 240p is stored.
    async fn completed_video(f: &Fixture) -> Uuid {
        let id = Uuid::new_v4();
        let ladder = quality_ladder(1280, 720);
        let renditions: Vec<ProducedRendition> = ladder
            .iter()
            .filter(|r| r.name == "240p" || r.name == "720p")
            .map(|r| {
                let playlist_key = format!(
                    "{}/playlist.m3u8",
                    f.layout.rendition_prefix("u1", id, &r.name)
                );
                ProducedRendition {
                    rendition: r.clone(),
                    output: RenditionOutput {
                        playlist_url: format!("file:///{playlist_key}"),
                        playlist_key,
                        segment_count: 3,
                        output_bytes: 100,
                    },
                }
            })
            .collect();

        put(&f.storage, &f.layout.master_manifest_key("u1", id)).await;
        put(&f.storage, &renditions[0].output.playlist_key).await;

        let mut record = VideoRecord::uploaded(id, "u1/source.mp4", "u1");
        record.status = VideoStatus::Completed;
        record.master_manifest_url = "file:///master.m3u8".to_string();
        record.renditions = renditions;
        f.repo.insert(record).await;
        id
    }

    #[tokio::test]
    async fn completed_video_resolves_existing_playlists() {
        let f = fixture();
        let id = completed_video(&f).await;

        let info = f.resolver.resolve(id, "u1").await.unwrap();
        assert_eq!(info.video_id, id);
        assert!(info.master_playlist_url.contains("master.m3u8?expires="));
        assert_eq!(info.qualities.len(), 1);
        assert_eq!(info.qualities[0].quality, "240p");
        assert_eq!(info.qualities[0].resolution, "426x240");
        assert_eq!(info.qualities[0].bandwidth, 500_000);
    }

    #[tokio::test]
    async fn other_users_are_refused() {
        let f = fixture();
        let id = completed_video(&f).await;

        assert!(matches!(
            f.resolver.resolve(id, "u2").await,
            Err(PlaybackError::Forbidden(found)) if found == id
        ));
    }

    #[tokio::test]
    async fn unknown_video_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.resolver.resolve(Uuid::new_v4(), "u1").await,
            Err(PlaybackError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unfinished_or_empty_videos_are_not_ready() {
        let f = fixture();

        let processing = Uuid::new_v4();
        let mut record = VideoRecord::uploaded(processing, "u1/a.mp4", "u1");
        record.status = VideoStatus::Processing;
        f.repo.insert(record).await;

        // Completed with nothing produced: the zero-rendition outcome.
        let empty = Uuid::new_v4();
        let mut record = VideoRecord::uploaded(empty, "u1/b.mp4", "u1");
        record.status = VideoStatus::Completed;
        f.repo.insert(record).await;

        for id in [processing, empty] {
            assert!(matches!(
                f.resolver.resolve(id, "u1").await,
                Err(PlaybackError::NotReady { video_id, .. }) if video_id == id
            ));
        }
    }
}

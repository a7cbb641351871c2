//! Object key layout of everything the pipeline publishes.

use super::hls::MASTER_PLAYLIST_NAME;
use uuid::Uuid;

/// Builds output keys under `<prefix>/<user_id>/<video_id>/hls/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    prefix: String,
}

impl OutputLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn video_root(&self, user_id: &str, video_id: Uuid) -> String {
        format!("{}/{}/{}/hls", self.prefix, user_id, video_id)
    }

    pub fn rendition_prefix(&self, user_id: &str, video_id: Uuid, rendition: &str) -> String {
        format!("{}/{}", self.video_root(user_id, video_id), rendition)
    }

    pub fn master_manifest_key(&self, user_id: &str, video_id: Uuid) -> String {
        format!("{}/{}", self.video_root(user_id, video_id), MASTER_PLAYLIST_NAME)
    }
}

use crate::domain::jobs::ProcessRequest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod hub;
pub mod listener;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadEvent {
    /// A source video landed in storage and is ready to process.
    SourceUploaded {
        bucket: String,
        source_key: String,
        video_id: Uuid,
        user_id: String,
    },
}

impl UploadEvent {
    pub fn video_id(&self) -> Uuid {
        match self {
            UploadEvent::SourceUploaded { video_id, .. } => *video_id,
        }
    }

    pub fn into_request(self) -> ProcessRequest {
        match self {
            UploadEvent::SourceUploaded {
                bucket,
                source_key,
                video_id,
                user_id,
            } => ProcessRequest {
                bucket,
                source_key,
                video_id,
                user_id,
            },
        }
    }
}

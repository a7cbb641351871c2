use crate::domain::ladder::Rendition;
use crate::domain::probe::MediaInfo;
use crate::error::MediaError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Files a finished transcode left in its output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOutput {
    pub playlist: PathBuf,
    pub segments: Vec<PathBuf>,
}

/// External prober/encoder.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaToolPort: Send + Sync {
    /// Fails with `MediaError::Probe` or `MediaError::InvalidMetadata` on
    /// unreadable or non-video input.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError>;

    /// Produce one HLS rendition into `output_dir`. A successful return means
    /// the playlist is complete and every segment it references exists.
    /// Firing `cancel` aborts the encoder and yields `MediaError::Cancelled`.
    async fn transcode(
        &self,
        input: &Path,
        rendition: &Rendition,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutput, MediaError>;
}

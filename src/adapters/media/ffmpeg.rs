//! `ffprobe`/`ffmpeg` CLI adapter.
//!
//! Every child process is spawned with `kill_on_drop`, so dropping the wait
//! future on cancellation tears the encoder down.

use crate::domain::hls::{MediaPlaylist, MEDIA_PLAYLIST_NAME};
use crate::domain::ladder::Rendition;
use crate::domain::probe::MediaInfo;
use crate::error::MediaError;
use crate::ports::media::{MediaToolPort, TranscodeOutput};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

/// Lines of ffmpeg stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    segment_seconds: u32,
}

impl FfmpegTool {
    pub fn new(segment_seconds: u32) -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            segment_seconds,
        }
    }

    pub fn with_binaries(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Fail fast at startup when either binary is missing.
    pub async fn check_available(&self) -> Result<(), MediaError> {
        for (binary, name) in [(&self.ffmpeg, "ffmpeg"), (&self.ffprobe, "ffprobe")] {
            let status = Command::new(binary)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|_| MediaError::ToolNotFound(name))?;
            if !status.success() {
                return Err(MediaError::ToolNotFound(name));
            }
        }
        Ok(())
    }
}

/// Arguments of one HLS rendition encode.
pub fn transcode_args(
    input: &Path,
    rendition: &Rendition,
    output_dir: &Path,
    segment_seconds: u32,
) -> Vec<String> {
    let kbps = rendition.bitrate_kbps;
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-y", "-loglevel", "error", "-i"]
        .into_iter()
        .map(String::from)
        .collect();
    args.push(input.display().to_string());
    args.extend(
        [
            "-vf".to_string(),
            format!("scale={}:-2", rendition.width),
            "-c:a".to_string(),
            "aac".to_string(),
            "-ar".to_string(),
            "48000".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            "-c:v".to_string(),
            "h264".to_string(),
            "-profile:v".to_string(),
            "main".to_string(),
            "-crf".to_string(),
            "20".to_string(),
            "-g".to_string(),
            "48".to_string(),
            "-keyint_min".to_string(),
            "48".to_string(),
            "-sc_threshold".to_string(),
            "0".to_string(),
            "-b:v".to_string(),
            format!("{kbps}k"),
            "-maxrate".to_string(),
            format!("{}k", kbps * 2),
            "-bufsize".to_string(),
            format!("{}k", kbps * 4),
            "-hls_time".to_string(),
            segment_seconds.to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
            "-hls_segment_filename".to_string(),
            output_dir.join(SEGMENT_PATTERN).display().to_string(),
            "-f".to_string(),
            "hls".to_string(),
        ],
    );
    args.push(output_dir.join(MEDIA_PLAYLIST_NAME).display().to_string());
    args
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Check that the encoder left a complete VOD playlist whose every segment
/// exists and is non-empty. Returns the segment paths in playlist order.
pub async fn validate_output(output_dir: &Path) -> Result<TranscodeOutput, MediaError> {
    let playlist_path = output_dir.join(MEDIA_PLAYLIST_NAME);
    let content = tokio::fs::read_to_string(&playlist_path)
        .await
        .map_err(|e| MediaError::Incomplete(format!("no playlist written: {e}")))?;
    let playlist = MediaPlaylist::parse(&content).map_err(MediaError::Incomplete)?;

    if !playlist.end_list {
        return Err(MediaError::Incomplete("playlist has no #EXT-X-ENDLIST".to_string()));
    }
    if playlist.segments.is_empty() {
        return Err(MediaError::Incomplete("playlist lists no segments".to_string()));
    }

    let mut segments = Vec::with_capacity(playlist.segments.len());
    for segment in &playlist.segments {
        if segment.uri.contains('/') || segment.uri.contains('\\') {
            return Err(MediaError::Incomplete(format!(
                "segment {} is outside the output dir",
                segment.uri
            )));
        }
        let path = output_dir.join(&segment.uri);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() > 0 => segments.push(path),
            Ok(_) => {
                return Err(MediaError::Incomplete(format!("segment {} is empty", segment.uri)))
            }
            Err(_) => {
                return Err(MediaError::Incomplete(format!("segment {} is missing", segment.uri)))
            }
        }
    }

    Ok(TranscodeOutput {
        playlist: playlist_path,
        segments,
    })
}

#[async_trait]
impl MediaToolPort for FfmpegTool {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::ToolNotFound("ffprobe"),
                _ => MediaError::Io(e),
            })?;

        if !output.status.success() {
            return Err(MediaError::Probe(format!(
                "ffprobe exited with {}: {}",
                output.status,
                stderr_tail(&output)
            )));
        }

        MediaInfo::from_ffprobe_json(&output.stdout)
    }

    async fn transcode(
        &self,
        input: &Path,
        rendition: &Rendition,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutput, MediaError> {
        let args = transcode_args(input, rendition, output_dir, self.segment_seconds);
        debug!(rendition = %rendition.name, ?args, "Spawning ffmpeg");

        let child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MediaError::ToolNotFound("ffmpeg"),
                _ => MediaError::Io(e),
            })?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(rendition = %rendition.name, "Killing ffmpeg, transcode cancelled");
                return Err(MediaError::Cancelled);
            }
            output = child.wait_with_output() => output?,
        };

        if !output.status.success() {
            return Err(MediaError::Transcode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr_tail(&output)
            )));
        }

        validate_output(output_dir).await
    }
}

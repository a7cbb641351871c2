//! HLS playlist model: the master playlist we publish per video and the
//! media playlists the encoder leaves behind per rendition.

use super::ladder::Rendition;
use std::fmt::Write as _;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Filename of every per-rendition media playlist.
pub const MEDIA_PLAYLIST_NAME: &str = "playlist.m3u8";
pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";

#[derive(Debug, Clone, PartialEq)]
pub struct MediaSegment {
    pub duration: f64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: u8,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<MediaSegment>,
    pub end_list: bool,
    pub playlist_type: Option<String>,
}

impl MediaPlaylist {
    pub fn new(target_duration: u64) -> Self {
        Self {
            version: 3,
            target_duration,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: true,
            playlist_type: Some("VOD".to_string()),
        }
    }

    pub fn add_segment(&mut self, duration: f64, uri: String) {
        self.segments.push(MediaSegment { duration, uri });
    }

    /// Read back a media playlist. Unknown tags are skipped.
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
        if lines.next() != Some("#EXTM3U") {
            return Err("missing #EXTM3U header".to_string());
        }

        let mut playlist = MediaPlaylist {
            version: 1,
            target_duration: 0,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: false,
            playlist_type: None,
        };
        let mut pending_duration: Option<f64> = None;

        for line in lines {
            if let Some(value) = line.strip_prefix("#EXT-X-VERSION:") {
                playlist.version = value.parse().map_err(|_| format!("bad version: {value}"))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = value
                    .parse()
                    .map_err(|_| format!("bad target duration: {value}"))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = value
                    .parse()
                    .map_err(|_| format!("bad media sequence: {value}"))?;
            } else if let Some(value) = line.strip_prefix("#EXT-X-PLAYLIST-TYPE:") {
                playlist.playlist_type = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix("#EXTINF:") {
                let duration = value.split(',').next().unwrap_or_default();
                pending_duration = Some(
                    duration
                        .parse()
                        .map_err(|_| format!("bad segment duration: {duration}"))?,
                );
            } else if line == "#EXT-X-ENDLIST" {
                playlist.end_list = true;
            } else if line.starts_with('#') {
                continue;
            } else {
                let duration = pending_duration
                    .take()
                    .ok_or_else(|| format!("segment {line} has no #EXTINF"))?;
                playlist.add_segment(duration, line.to_string());
            }
        }

        Ok(playlist)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);
        if let Some(pt) = &self.playlist_type {
            let _ = writeln!(out, "#EXT-X-PLAYLIST-TYPE:{pt}");
        }
        for segment in &self.segments {
            let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration);
            let _ = writeln!(out, "{}", segment.uri);
        }
        if self.end_list {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut file = File::create(path).await?;
        file.write_all(self.render().as_bytes()).await?;
        file.flush().await
    }
}

/// One `EXT-X-STREAM-INF` entry of the master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStream {
    pub bandwidth: u64,
    pub width: u32,
    pub height: u32,
    /// Relative to the master playlist
    pub uri: String,
}

impl VariantStream {
    pub fn for_rendition(rendition: &Rendition) -> Self {
        Self {
            bandwidth: rendition.bandwidth(),
            width: rendition.width,
            height: rendition.height,
            uri: format!("{}/{}", rendition.name, MEDIA_PLAYLIST_NAME),
        }
    }
}

/// Multivariant playlist, variants kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterPlaylist {
    pub variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_renditions<'a>(renditions: impl IntoIterator<Item = &'a Rendition>) -> Self {
        Self {
            variants: renditions
                .into_iter()
                .map(VariantStream::for_rendition)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n\n");
        for variant in &self.variants {
            let _ = write!(
                out,
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}\n\n",
                variant.bandwidth, variant.width, variant.height, variant.uri
            );
        }
        out
    }
}

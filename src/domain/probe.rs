//! Source metadata as reported by `ffprobe -print_format json`.

use crate::error::MediaError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
    /// Container bitrate as ffprobe prints it, empty when unknown
    pub bitrate: String,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize, Default)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

impl MediaInfo {
    /// Read the first video stream's size and the container duration/bitrate.
    pub fn from_ffprobe_json(json: &[u8]) -> Result<Self, MediaError> {
        let output: ProbeOutput = serde_json::from_slice(json)
            .map_err(|e| MediaError::Probe(format!("unparseable ffprobe output: {e}")))?;

        let video = output
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| MediaError::InvalidMetadata("no video stream".to_string()))?;

        let (width, height) = match (video.width, video.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            (w, h) => {
                return Err(MediaError::InvalidMetadata(format!(
                    "video stream has no usable size ({}x{})",
                    w.unwrap_or(0),
                    h.unwrap_or(0)
                )))
            }
        };

        let duration_seconds = output
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(MediaInfo {
            width,
            height,
            duration_seconds,
            bitrate: output.format.bit_rate.unwrap_or_default(),
        })
    }
}

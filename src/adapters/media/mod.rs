//! Media tool adapters.

pub mod ffmpeg;

pub use ffmpeg::FfmpegTool;

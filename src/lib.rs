//! Adaptive-bitrate HLS pipeline.
//!
//! Hexagonal Architecture:
//! - domain/: Pure logic (quality ladder, jobs and outcomes, HLS playlists, key layout)
//! - ports/: Trait definitions for storage, media tooling and video records
//! - adapters/: Concrete implementations (filesystem, Redis, S3, DynamoDB, ffmpeg)
//! - application/: Generic services (worker pool, orchestrator, supervisor, playback)
//! - config: Environment configuration
//!
//! # Features
//! - `local`: Redis-backed video records for the monolith
//! - `aws`: S3 storage and DynamoDB video records

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

#[cfg(test)]
mod testing;

pub use config::PipelineConfig;
pub use domain::hls;

#[cfg(feature = "aws")]
pub use config::AwsConfig;

#[cfg(feature = "local")]
pub use config::LocalConfig;

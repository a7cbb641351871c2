//! Redis adapter for local deployment.
//!
//! Video records live as JSON documents under `abr:video:<id>`; the full
//! processing outcome of a finished video is kept under `abr:outcome:<id>`.

mod error;
mod pool;
mod repository;

pub use error::RedisAdapterError;
pub use pool::RedisPool;

/// Redis key constants
const VIDEO_RECORD_PREFIX: &str = "abr:video:";
const VIDEO_OUTCOME_PREFIX: &str = "abr:outcome:";

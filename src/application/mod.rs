//! Application layer - Generic services that use ports.

pub mod orchestrator;
pub mod playback;
pub mod status;
pub mod supervisor;
pub mod worker_pool;

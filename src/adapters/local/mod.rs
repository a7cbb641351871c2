//! Local adapters for monolith deployment and tests.

pub mod events;
pub mod fs;
pub mod memory;

#[cfg(feature = "local")]
pub mod redis;

pub use events::hub::EventHub;
pub use fs::FsAdapter;
pub use memory::InMemoryVideoRepository;

#[cfg(feature = "local")]
pub use redis::RedisPool;

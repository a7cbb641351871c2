//! Ports - collaborator contracts the application layer drives.

pub mod media;
pub mod repository;
pub mod storage;

//! Shared data models for the render node.
//!
//! This crate provides Serde-serializable types for:
//! - Queue assignments and coordinator jobs
//! - Render service metadata
//! - Binary scene data produced by the render engine

pub mod job;
pub mod scene;
pub mod service;

// Re-export common types
pub use job::{Assignment, Job, JobId, RegionFile};
pub use scene::SceneData;
pub use service::{RenderServiceInfo, PROTOCOL_VERSION};

//! Render engine gateway.
//!
//! This crate provides:
//! - The `RenderEngine` capability the worker pipeline renders through
//! - `ProcessRenderEngine`, which drives an external octree generator
//! - `StubRenderEngine` for tests (`test-util` feature)

pub mod command;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use command::{ProcessRenderEngine, RenderCommand, RenderEngineConfig};
pub use engine::{RenderEngine, RenderRequest, EMITTERGRID_FILE_NAME, OCTREE_FILE_NAME, OVERWORLD};
pub use error::{RenderError, RenderResult};

//! Render node worker.
//!
//! This crate provides:
//! - Queue supervision with reconnect backoff and a bounded worker pool
//! - Per-assignment processing: job fetch, downloads, render and upload
//! - Working directory and texture pack cache management
//! - Graceful shutdown

pub mod backoff;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod supervisor;
pub mod texture_cache;
pub mod workspace;

pub use backoff::Backoff;
pub use config::WorkerConfig;
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use logging::{JobLogger, Phase};
pub use processor::{AssignmentProcessor, Disposition, Outcome, ProcessorSettings};
pub use supervisor::{AssignmentHandler, QueueSupervisor, SupervisorSettings};
pub use texture_cache::TexturePackCache;
pub use workspace::WorkingDirectory;

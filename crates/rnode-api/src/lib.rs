//! Render service coordinator API client.
//!
//! This crate provides:
//! - Async operations for service info, jobs, scene descriptions and files
//! - Multipart upload of render results
//! - A size-bounded on-disk HTTP response cache

pub mod cache;
pub mod client;
pub mod error;

pub use cache::{PruneStats, ResponseCache};
pub use client::{ApiClient, ApiConfig, API_KEY_HEADER, JOB_NOT_FOUND_MARKER};
pub use error::{ApiError, ApiResult};

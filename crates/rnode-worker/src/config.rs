//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use rnode_queue::DEFAULT_QUEUE_NAME;

const DEFAULT_JOB_DIR: &str = "./rs_jobs";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Display name advertised to the broker
    pub worker_name: Option<String>,
    /// Root for per-assignment working directories
    pub job_dir: PathBuf,
    /// Shared texture pack cache
    pub texture_pack_dir: PathBuf,
    /// Worker pool capacity, also used as the prefetch limit
    pub pool_size: usize,
    /// Deadline for fetching job metadata
    pub job_fetch_timeout: Duration,
    /// Aggregate deadline for the scene and region downloads
    pub download_timeout: Duration,
    /// Deadline for a texture pack download
    pub texture_pack_timeout: Duration,
    /// Queue to consume from
    pub queue_name: String,
    /// Grace period when closing the broker connection
    pub close_grace: Duration,
    /// Prometheus exporter listen address
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_name: None,
            job_dir: PathBuf::from(DEFAULT_JOB_DIR),
            texture_pack_dir: PathBuf::from("./rs_texturepacks"),
            pool_size: 1,
            job_fetch_timeout: Duration::from_secs(600), // 10 minutes
            download_timeout: Duration::from_secs(4 * 3600),
            texture_pack_timeout: Duration::from_secs(4 * 3600),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            close_grace: Duration::from_secs(5),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let job_dir = match std::env::var("RS_JOB_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                warn!(
                    "RS_JOB_DIR not set, using {} for job working directories",
                    DEFAULT_JOB_DIR
                );
                defaults.job_dir
            }
        };

        Self {
            worker_name: std::env::var("RS_WORKER_NAME")
                .ok()
                .filter(|s| !s.is_empty()),
            job_dir,
            texture_pack_dir: std::env::var("RS_TEXTUREPACK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.texture_pack_dir),
            pool_size: std::env::var("RS_WORKER_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.pool_size),
            job_fetch_timeout: secs_from_env("RS_JOB_FETCH_TIMEOUT_SECS")
                .unwrap_or(defaults.job_fetch_timeout),
            download_timeout: secs_from_env("RS_DOWNLOAD_TIMEOUT_SECS")
                .unwrap_or(defaults.download_timeout),
            texture_pack_timeout: secs_from_env("RS_TEXTUREPACK_TIMEOUT_SECS")
                .unwrap_or(defaults.texture_pack_timeout),
            queue_name: std::env::var("RS_QUEUE_NAME").unwrap_or(defaults.queue_name),
            close_grace: secs_from_env("RS_CLOSE_GRACE_SECS").unwrap_or(defaults.close_grace),
            metrics_addr: std::env::var("RS_METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    /// Prefetch limit matching the pool capacity.
    pub fn prefetch(&self) -> u16 {
        u16::try_from(self.pool_size).unwrap_or(u16::MAX)
    }
}

fn secs_from_env(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

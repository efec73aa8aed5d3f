//! Size bound for the on-disk HTTP response cache.
//!
//! The cache itself is managed by `http-cache-reqwest` on top of a `cacache`
//! store. `cacache` never evicts, so this module trims the store back under the
//! configured budget, dropping the least recently written entries first.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ApiResult;

/// Handle to the response cache directory and its size budget.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    max_bytes: u64,
}

/// Outcome of one prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Entries found in the index
    pub entries: usize,
    /// Entries removed
    pub removed: usize,
    /// Bytes held before pruning
    pub bytes_before: u64,
    /// Bytes held after pruning
    pub bytes_after: u64,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Remove the oldest entries until the store fits the budget.
    ///
    /// Blocking; use [`ResponseCache::prune_async`] from async code.
    pub fn prune(&self) -> ApiResult<PruneStats> {
        if !self.dir.exists() {
            return Ok(PruneStats::default());
        }

        // The index does not record sizes for entries written by the HTTP
        // cache, so each entry is measured from its content file.
        let mut entries = Vec::new();
        for entry in cacache::list_sync(&self.dir) {
            match entry {
                Ok(metadata) => {
                    let size = self.content_size(&metadata);
                    entries.push((metadata, size));
                }
                Err(e) => debug!(error = %e, "Skipping unreadable cache index entry"),
            }
        }

        let bytes_before: u64 = entries.iter().map(|(_, size)| size).sum();
        let mut stats = PruneStats {
            entries: entries.len(),
            removed: 0,
            bytes_before,
            bytes_after: bytes_before,
        };

        if bytes_before <= self.max_bytes {
            return Ok(stats);
        }

        entries.sort_by_key(|(m, _)| m.time);

        for (metadata, size) in entries {
            if stats.bytes_after <= self.max_bytes {
                break;
            }
            cacache::remove_sync(&self.dir, &metadata.key)?;
            if let Err(e) = cacache::remove_hash_sync(&self.dir, &metadata.integrity) {
                // Content may be shared with another key or already gone.
                debug!(key = %metadata.key, error = %e, "Cache content not removed");
            }
            stats.removed += 1;
            stats.bytes_after = stats.bytes_after.saturating_sub(size);
        }

        info!(
            removed = stats.removed,
            bytes_before = stats.bytes_before,
            bytes_after = stats.bytes_after,
            max_bytes = self.max_bytes,
            "Pruned HTTP response cache"
        );

        Ok(stats)
    }

    /// Bytes stored for an index entry.
    fn content_size(&self, metadata: &cacache::Metadata) -> u64 {
        if let Ok(file) = std::fs::metadata(content_path(&self.dir, &metadata.integrity)) {
            return file.len();
        }
        match cacache::read_hash_sync(&self.dir, &metadata.integrity) {
            Ok(bytes) => bytes.len() as u64,
            Err(_) => 0,
        }
    }

    /// Run [`ResponseCache::prune`] on the blocking pool.
    ///
    /// Failures are logged, never returned: the cache only reduces load.
    pub async fn prune_async(&self) -> Option<PruneStats> {
        let cache = self.clone();
        match tokio::task::spawn_blocking(move || cache.prune()).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to prune HTTP response cache");
                None
            }
            Err(e) => {
                warn!(error = %e, "HTTP response cache prune task panicked");
                None
            }
        }
    }
}

/// Location of a content blob: `content-v2/{algo}/{xx}/{yy}/{rest of hex}`.
fn content_path(dir: &Path, integrity: &cacache::Integrity) -> PathBuf {
    let (algorithm, hex) = integrity.to_hex();
    dir.join("content-v2")
        .join(algorithm.to_string())
        .join(&hex[0..2])
        .join(&hex[2..4])
        .join(&hex[4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_missing_dir_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(tmp.path().join("absent"), 10);
        assert_eq!(cache.prune().unwrap(), PruneStats::default());
    }

    #[test]
    fn test_prune_under_budget_keeps_everything() {
        let tmp = tempfile::tempdir().unwrap();
        cacache::write_sync(tmp.path(), "GET:http://a/info", b"0123456789").unwrap();

        let cache = ResponseCache::new(tmp.path(), 1024);
        let stats = cache.prune().unwrap();

        assert_eq!(stats.entries, 1);
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.bytes_before, 10);
        assert!(cacache::read_sync(tmp.path(), "GET:http://a/info").is_ok());
    }

    #[test]
    fn test_prune_evicts_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        cacache::write_sync(tmp.path(), "old", vec![1u8; 600]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        cacache::write_sync(tmp.path(), "new", vec![2u8; 600]).unwrap();

        let cache = ResponseCache::new(tmp.path(), 1000);
        let stats = cache.prune().unwrap();

        assert_eq!(stats.removed, 1);
        assert_eq!(stats.bytes_before, 1200);
        assert_eq!(stats.bytes_after, 600);
        assert!(cacache::read_sync(tmp.path(), "old").is_err());
        assert_eq!(cacache::read_sync(tmp.path(), "new").unwrap(), vec![2u8; 600]);
    }

    #[test]
    fn test_content_path_matches_store_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let integrity = cacache::write_sync(tmp.path(), "k", b"payload").unwrap();
        let path = content_path(tmp.path(), &integrity);
        assert_eq!(std::fs::read(path).unwrap(), b"payload");
    }
}

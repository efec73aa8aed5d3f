//! Shared texture pack cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use rnode_api::ApiClient;

use crate::error::{WorkerError, WorkerResult};

/// Directory of texture packs stored as `{id}.zip`.
///
/// Shared by every assignment without locking. Two assignments may download
/// the same pack at once; downloads land via rename, so the last writer wins
/// with identical bytes.
#[derive(Debug, Clone)]
pub struct TexturePackCache {
    dir: PathBuf,
}

impl TexturePackCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache location for a texture pack id.
    pub fn path_for(&self, texture_pack_id: &str) -> WorkerResult<PathBuf> {
        let valid = !texture_pack_id.is_empty()
            && texture_pack_id != "."
            && texture_pack_id != ".."
            && !texture_pack_id.contains(['/', '\\']);
        if !valid {
            return Err(WorkerError::invalid_input(format!(
                "texture pack id {:?} is not a valid file name",
                texture_pack_id
            )));
        }
        Ok(self.dir.join(format!("{}.zip", texture_pack_id)))
    }

    /// Return the cached pack, downloading it first if it is missing.
    pub async fn ensure(
        &self,
        api: &ApiClient,
        texture_pack_id: &str,
        timeout: Duration,
    ) -> WorkerResult<PathBuf> {
        let path = self.path_for(texture_pack_id)?;

        if tokio::fs::try_exists(&path).await? {
            debug!(texture_pack = texture_pack_id, "Texture pack already cached");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        info!(texture_pack = texture_pack_id, "Downloading texture pack");

        tokio::time::timeout(timeout, api.download_texture_pack(texture_pack_id, &path))
            .await
            .map_err(|_| WorkerError::timeout("texture pack download", timeout))?
            .map_err(|e| WorkerError::download(format!("texture pack {}", texture_pack_id), e))?;

        Ok(path)
    }
}

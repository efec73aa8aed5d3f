//! Per-assignment working directories.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

const SCENE_FILE_NAME: &str = "scene.json";
const REGION_DIR_NAME: &str = "region";

/// A uniquely named directory owned by one assignment.
///
/// Doubles as the world root handed to the render engine. Removed by
/// [`WorkingDirectory::remove`], or on drop if that never ran.
#[derive(Debug)]
pub struct WorkingDirectory {
    path: PathBuf,
    removed: bool,
}

impl WorkingDirectory {
    /// Create a fresh directory under `root`.
    pub async fn create(root: &Path) -> io::Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the rewritten scene description is persisted.
    pub fn scene_path(&self) -> PathBuf {
        self.path.join(SCENE_FILE_NAME)
    }

    pub fn region_dir(&self) -> PathBuf {
        self.path.join(REGION_DIR_NAME)
    }

    /// Delete the directory and everything in it.
    pub async fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove working directory"
                );
            }
        }
    }
}

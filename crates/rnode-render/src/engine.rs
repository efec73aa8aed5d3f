//! Render engine capability.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use rnode_models::SceneData;

use crate::error::{RenderError, RenderResult};

/// Dimension selector for the overworld.
pub const OVERWORLD: i32 = 0;

/// File the engine writes the octree to, next to the scene description.
pub const OCTREE_FILE_NAME: &str = "scene.octree2";

/// File the engine writes the emitter grid to, if the scene has emitters.
pub const EMITTERGRID_FILE_NAME: &str = "scene.emittergrid";

/// Inputs for one scene data generation.
///
/// The texture pack travels with every request; engines keep no
/// texture-pack state between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Persisted scene description (`scene.json`)
    pub scene_description: PathBuf,
    /// Directory acting as the world root (contains `region/`)
    pub world_directory: PathBuf,
    /// Dimension to load chunks from
    pub dimension: i32,
    /// Texture pack archive, if the job selected one
    pub texture_pack: Option<PathBuf>,
}

impl RenderRequest {
    pub fn new(scene_description: impl Into<PathBuf>, world_directory: impl Into<PathBuf>) -> Self {
        Self {
            scene_description: scene_description.into(),
            world_directory: world_directory.into(),
            dimension: OVERWORLD,
            texture_pack: None,
        }
    }

    pub fn with_dimension(mut self, dimension: i32) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_texture_pack(mut self, texture_pack: Option<PathBuf>) -> Self {
        self.texture_pack = texture_pack;
        self
    }

    /// Directory the engine writes its artifacts to.
    pub fn output_directory(&self) -> RenderResult<&Path> {
        self.scene_description
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                RenderError::invalid_request(format!(
                    "scene description {} has no parent directory",
                    self.scene_description.display()
                ))
            })
    }
}

/// Something that turns a scene description and a world into scene data.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Load the scene's chunks and serialize the octree and emitter grid.
    ///
    /// May take a long time; callers run at most one call per pool slot.
    async fn generate_scene_data(&self, request: &RenderRequest) -> RenderResult<SceneData>;
}

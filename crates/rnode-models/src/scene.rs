//! Binary scene artifacts.

/// Output of one render engine invocation.
///
/// Consumed once by the upload step, then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SceneData {
    /// Serialized voxel octree
    pub octree: Vec<u8>,
    /// Serialized emitter grid, if the scene produced one
    pub emitter_grid: Option<Vec<u8>>,
}

impl SceneData {
    pub fn new(octree: Vec<u8>, emitter_grid: Option<Vec<u8>>) -> Self {
        Self {
            octree,
            emitter_grid,
        }
    }

    /// Total payload size in bytes.
    pub fn len(&self) -> usize {
        self.octree.len() + self.emitter_grid.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

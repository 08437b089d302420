//! Scene voxelization
//!
//! The scene is rasterized 64 times, once per depth slab of a fixed cube, with an
//! orthographic camera whose near and far planes bound the slab. Each slab image becomes one
//! layer of a 64x64x64 color volume, which then gets a box-filtered mip chain.

mod grid;
mod volume;
mod voxelizer;

pub use grid::{LayerCamera, VoxelGrid};
pub use volume::VoxelVolume;
pub use voxelizer::{VoxelOccupancy, Voxelizer};

use crate::backend::TextureFormat;

/// Texels along each axis of the voxel volume
pub const VOXEL_RESOLUTION: u32 = 64;

/// Levels of the volume's mip chain (64 down to 1)
pub const VOXEL_MIP_LEVELS: u32 = 7;

/// Texel format of the voxel volume
pub const VOXEL_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// Color empty voxels keep
pub const VOXEL_CLEAR_COLOR: [f32; 4] = [0.0; 4];

/// Freshness of the sampled voxel volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelState {
    /// Does not reflect the current scene
    Stale,
    /// A voxelization pass is being recorded
    Voxelizing,
    /// Built from the scene as of the last voxelization
    Fresh,
}

/// When `render_frame` voxelizes on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelPolicy {
    /// Whenever the volume is stale. The volume starts stale, so the first frame voxelizes.
    Auto,
    /// Only through `Renderer::revoxelize`
    Manual,
    /// Mark the volume stale every `n` frames, then voxelize as with `Auto`
    Cadence(u32),
}

impl VoxelPolicy {
    /// Whether frame number `frame` should mark the volume stale
    pub fn marks_stale(&self, frame: u64) -> bool {
        match *self {
            VoxelPolicy::Cadence(n) => frame % u64::from(n.max(1)) == 0,
            VoxelPolicy::Auto | VoxelPolicy::Manual => false,
        }
    }

    /// Whether a stale volume is rebuilt during `render_frame`
    pub fn voxelizes_when_stale(&self) -> bool {
        !matches!(self, VoxelPolicy::Manual)
    }
}

/// Voxelization settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelConfig {
    /// Half edge length of the voxelized cube, centered at the origin
    pub scene_scale: f32,
    pub policy: VoxelPolicy,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            scene_scale: 1.0,
            policy: VoxelPolicy::Auto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_marks_every_nth_frame() {
        let policy = VoxelPolicy::Cadence(3);
        let marked: Vec<u64> = (0..10).filter(|f| policy.marks_stale(*f)).collect();
        assert_eq!(marked, vec![0, 3, 6, 9]);
        assert!(policy.voxelizes_when_stale());
    }

    #[test]
    fn manual_never_runs_on_its_own() {
        assert!(!VoxelPolicy::Manual.voxelizes_when_stale());
        assert!(!VoxelPolicy::Manual.marks_stale(0));
        assert!(!VoxelPolicy::Auto.marks_stale(0));
    }
}

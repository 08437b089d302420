//! Geometry of the voxel region and its 64 depth slabs.

use glam::{Mat4, Vec3};

use crate::scene::Aabb;

use super::VOXEL_RESOLUTION;

/// Orthographic camera rendering one slab
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerCamera {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_proj: Mat4,
}

/// The cube `[-scale, scale]^3` split into `VOXEL_RESOLUTION` texels per axis.
///
/// Layer 0 is the slab nearest `+Z`; rows run from `+Y` down, columns from `-X` right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    scale: f32,
}

impl VoxelGrid {
    pub fn new(scale: f32) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn resolution(&self) -> u32 {
        VOXEL_RESOLUTION
    }

    /// Edge length of one voxel in world units
    pub fn voxel_size(&self) -> f32 {
        2.0 * self.scale / VOXEL_RESOLUTION as f32
    }

    /// Near and far plane distances of `layer`, measured from the camera at `z = +scale`
    pub fn layer_depth_range(&self, layer: u32) -> (f32, f32) {
        let d = self.voxel_size();
        (layer as f32 * d, (layer + 1) as f32 * d)
    }

    /// Camera at `(0, 0, +scale)` looking down `-Z` whose clip volume is exactly `layer`'s slab.
    pub fn layer_camera(&self, layer: u32) -> LayerCamera {
        let s = self.scale;
        let (near, far) = self.layer_depth_range(layer);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, s), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::orthographic_rh(-s, s, -s, s, near, far);
        LayerCamera {
            view,
            projection,
            view_proj: projection * view,
        }
    }

    /// World-space box covered by `layer`
    pub fn slab_bounds(&self, layer: u32) -> Aabb {
        let s = self.scale;
        let (near, far) = self.layer_depth_range(layer);
        Aabb::new(Vec3::new(-s, -s, s - far), Vec3::new(s, s, s - near))
    }

    /// Whether geometry inside `bounds` can produce fragments in `layer`
    pub fn layer_intersects(&self, layer: u32, bounds: &Aabb) -> bool {
        self.slab_bounds(layer).intersects(bounds)
    }

    /// World-space center of texel `(column, row, layer)`. Inverse of [`Self::world_to_uvw`]
    /// at texel centers.
    pub fn texel_center(&self, column: u32, row: u32, layer: u32) -> Vec3 {
        let s = self.scale;
        let d = self.voxel_size();
        Vec3::new(
            -s + (column as f32 + 0.5) * d,
            s - (row as f32 + 0.5) * d,
            s - (layer as f32 + 0.5) * d,
        )
    }

    /// Normalized volume coordinates of a world position.
    ///
    /// CPU mirror of `world_to_uvw` in `shaders/voxel_debug.wgsl`; the two must stay in sync.
    pub fn world_to_uvw(&self, world: Vec3) -> Vec3 {
        let s = self.scale;
        let extent = 2.0 * s;
        Vec3::new(
            (world.x + s) / extent,
            (s - world.y) / extent,
            (s - world.z) / extent,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_tile_the_region() {
        let grid = VoxelGrid::new(2.0);
        assert_eq!(grid.layer_depth_range(0), (0.0, 0.0625));
        assert_eq!(grid.layer_depth_range(63).1, 4.0);
        assert_eq!(grid.slab_bounds(0).max.z, 2.0);
        assert_eq!(grid.slab_bounds(63).min.z, -2.0);
    }

    #[test]
    fn layer_camera_maps_slab_into_clip_volume() {
        let grid = VoxelGrid::new(1.0);
        let camera = grid.layer_camera(10);
        let center = grid.texel_center(32, 32, 10);
        let clip = camera.view_proj.project_point3(center);
        assert!(clip.x.abs() < 0.05 && clip.y.abs() < 0.05);
        assert!(clip.z > 0.0 && clip.z < 1.0);

        let outside = grid.texel_center(32, 32, 11);
        assert!(camera.view_proj.project_point3(outside).z > 1.0);
    }

    #[test]
    fn texel_centers_round_trip_through_uvw() {
        let grid = VoxelGrid::new(1.5);
        let uvw = grid.world_to_uvw(grid.texel_center(0, 63, 5));
        let expected = Vec3::new(0.5, 63.5, 5.5) / 64.0;
        assert!((uvw - expected).length() < 1e-5);
    }

    #[test]
    fn centered_cube_touches_middle_layers_only() {
        let grid = VoxelGrid::new(1.0);
        let cube = Aabb::new(Vec3::splat(-0.25), Vec3::splat(0.25));
        let layers: Vec<u32> = (0..VOXEL_RESOLUTION)
            .filter(|layer| grid.layer_intersects(*layer, &cube))
            .collect();
        assert_eq!(layers, (24..=39).collect::<Vec<_>>());
    }
}

//! Scene management
//!
//! The renderer reads a [`Scene`] and a [`CameraView`] once per frame and never mutates them.

mod bounds;
mod camera;
mod light;
mod transform;

pub use bounds::*;
pub use camera::*;
pub use light::*;
pub use transform::*;

use std::ops::Range;

use glam::Mat4;

use crate::resources::{GpuMesh, Material};

/// Runtime-tunable shading parameters, folded into every material record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UiParams {
    pub bump_intensity: f32,
    pub display_bump: bool,
    pub display_specular: bool,
    /// Mip level of the voxel volume shown by the debug overlay
    pub voxel_debug_mip: f32,
}

impl Default for UiParams {
    fn default() -> Self {
        Self {
            bump_intensity: 1.0,
            display_bump: true,
            display_specular: true,
            voxel_debug_mip: 0.0,
        }
    }
}

/// A range of a mesh's indices drawn with one material.
#[derive(Debug, Clone)]
pub struct MeshPart {
    pub indices: Range<u32>,
    pub material: Material,
}

/// A renderable object in the scene
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub mesh: GpuMesh,
    pub transform: Transform,
    pub parts: Vec<MeshPart>,
}

impl SceneObject {
    /// Object drawing its whole mesh with one material
    pub fn new(name: &str, mesh: GpuMesh, material: Material) -> Self {
        let parts = vec![MeshPart {
            indices: 0..mesh.index_count(),
            material,
        }];
        Self {
            name: name.to_string(),
            mesh,
            transform: Transform::default(),
            parts,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_parts(mut self, parts: Vec<MeshPart>) -> Self {
        self.parts = parts;
        self
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.transform.matrix()
    }

    pub fn normal_matrix(&self) -> Mat4 {
        self.transform.normal_matrix()
    }

    /// Bounds of the mesh in world space
    pub fn world_bounds(&self) -> Aabb {
        self.mesh.bounds().transformed(&self.model_matrix())
    }
}

/// The scene containing all renderable content
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub point_lights: Vec<PointLight>,
    pub directional_lights: Vec<DirectionalLight>,
    pub ui: UiParams,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object, returning its index in draw order
    pub fn add_object(&mut self, object: SceneObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn add_point_light(&mut self, light: PointLight) {
        self.point_lights.push(light);
    }

    pub fn add_directional_light(&mut self, light: DirectionalLight) {
        self.directional_lights.push(light);
    }

    /// Number of draws the objects issue in one pass
    pub fn draw_count(&self) -> usize {
        self.objects.iter().map(|o| o.parts.len()).sum()
    }
}

//! Byte layouts of the uniform records.
//!
//! Every record is `#[repr(C)]` with explicit padding words so the Rust struct, the
//! documented word order and the WGSL struct agree exactly.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// Size of one shader word in bytes
pub const WORD_SIZE: usize = 4;

/// Words per light record
pub const LIGHT_DATA_CHUNK_SIZE: usize = 12;

/// Lights of one kind the shaders iterate over
pub const MAX_LIGHTS: usize = 16;

/// Words per material record
pub const MATERIAL_DATA_CHUNK_SIZE: usize = 20;

/// Byte offset of light record `index` inside a light block.
pub const fn light_offset(index: usize) -> u64 {
    (index * LIGHT_DATA_CHUNK_SIZE * WORD_SIZE) as u64
}

/// One point or directional light.
///
/// Words: `[x, y, z, 0, r, g, b, intensity, debug, 0, 0, 0]`. The position (or direction)
/// is already in view space.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightChunk {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub color: [f32; 3],
    pub intensity: f32,
    pub debug: f32,
    pub _pad1: [f32; 3],
}

const_assert_eq!(size_of::<LightChunk>(), LIGHT_DATA_CHUNK_SIZE * WORD_SIZE);

impl LightChunk {
    pub fn new(position: Vec3, color: Vec3, intensity: f32, debug: bool) -> Self {
        Self {
            position: position.to_array(),
            _pad0: 0.0,
            color: color.to_array(),
            intensity,
            debug: flag(debug),
            _pad1: [0.0; 3],
        }
    }
}

/// Surface parameters plus the UI switches that affect shading.
///
/// Each color is followed by one padding word; map presence and display toggles are stored
/// as 0.0 / 1.0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialChunk {
    pub ambient: [f32; 3],
    pub _pad0: f32,
    pub diffuse: [f32; 3],
    pub _pad1: f32,
    pub specular: [f32; 3],
    pub _pad2: f32,
    pub specular_exponent: f32,
    pub bump_intensity: f32,
    pub has_diffuse_map: f32,
    pub has_bump_map: f32,
    pub has_specular_map: f32,
    pub has_alpha_map: f32,
    pub display_bump: f32,
    pub display_specular: f32,
}

const_assert_eq!(size_of::<MaterialChunk>(), MATERIAL_DATA_CHUNK_SIZE * WORD_SIZE);

/// Camera matrices and the number of valid light records in each light block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneChunk {
    pub view: Mat4,
    pub projection: Mat4,
    /// `[point, directional, 0, 0]`
    pub light_counts: [u32; 4],
}

const_assert_eq!(size_of::<SceneChunk>(), 144);

/// Per-object transform record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelChunk {
    pub model: Mat4,
    pub normal: Mat4,
}

const_assert_eq!(size_of::<ModelChunk>(), 128);

/// Per-layer voxelization camera.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct VoxelChunk {
    pub view_proj: Mat4,
    /// `[layer, layer count, scene scale, 0]`
    pub params: [f32; 4],
}

const_assert_eq!(size_of::<VoxelChunk>(), 80);

/// Parameters of the voxel debug overlay.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DebugChunk {
    /// `[mip level, scene scale, voxel resolution, 0]`
    pub params: [f32; 4],
    /// Overlay rectangle in normalized surface coordinates `[x, y, width, height]`
    pub rect: [f32; 4],
}

const_assert_eq!(size_of::<DebugChunk>(), 32);

pub(crate) fn flag(value: bool) -> f32 {
    if value {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_chunk_word_order() {
        let chunk = LightChunk::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.1, 0.2, 0.3), 4.0, true);
        let words: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&chunk));
        assert_eq!(
            words,
            &[1.0, 2.0, 3.0, 0.0, 0.1, 0.2, 0.3, 4.0, 1.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn light_offsets_are_48_bytes_apart() {
        assert_eq!(light_offset(0), 0);
        assert_eq!(light_offset(1), 48);
        assert_eq!(light_offset(MAX_LIGHTS - 1), 720);
    }

    #[test]
    fn material_chunk_is_twenty_words() {
        assert_eq!(size_of::<MaterialChunk>(), 80);
        let chunk = MaterialChunk {
            ambient: [1.0; 3],
            diffuse: [2.0; 3],
            specular: [3.0; 3],
            specular_exponent: 4.0,
            ..Zeroable::zeroed()
        };
        let words: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&chunk));
        assert_eq!(&words[..12], &[1.0, 1.0, 1.0, 0.0, 2.0, 2.0, 2.0, 0.0, 3.0, 3.0, 3.0, 0.0]);
        assert_eq!(words[12], 4.0);
    }
}

//! Light types for the scene
//!
//! Lights are described in world space. The renderer moves them into view space when it
//! packs them, so a scene never carries view-dependent data.

use glam::{Mat4, Vec3};

use crate::uniform::LightChunk;

/// Edge length of the cube drawn for debug-flagged lights
pub const LIGHT_MARKER_SIZE: f32 = 0.1;

/// Omnidirectional light at a point
#[derive(Debug, Clone, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Draw a marker cube at the light and flag the record
    pub debug: bool,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
            debug: false,
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            position,
            color,
            intensity,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Model matrix of the debug marker
    pub fn marker_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::splat(LIGHT_MARKER_SIZE),
            glam::Quat::IDENTITY,
            self.position,
        )
    }

    /// Record with the position moved into the space of `view`
    pub fn chunk(&self, view: &Mat4) -> LightChunk {
        LightChunk::new(
            view.transform_point3(self.position),
            self.color,
            self.intensity,
            self.debug,
        )
    }
}

/// Light arriving from one direction (like the sun)
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub debug: bool,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
            debug: false,
        }
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or_zero(),
            color,
            intensity,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Model matrix of the debug marker, placed `distance` units up-light of the origin
    pub fn marker_matrix(&self, distance: f32) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::splat(LIGHT_MARKER_SIZE),
            glam::Quat::IDENTITY,
            -self.direction * distance,
        )
    }

    /// Record with the direction rotated into the space of `view`
    pub fn chunk(&self, view: &Mat4) -> LightChunk {
        LightChunk::new(
            view.transform_vector3(self.direction),
            self.color,
            self.intensity,
            self.debug,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_light_position_is_moved_into_view_space() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ONE, 2.0);
        let chunk = light.chunk(&view);
        assert_eq!(chunk.position, [1.0, 2.0, -2.0]);
        assert_eq!(chunk.intensity, 2.0);
    }

    #[test]
    fn directional_light_ignores_translation() {
        let view = Mat4::from_translation(Vec3::new(3.0, 0.0, 0.0));
        let light = DirectionalLight::new(Vec3::new(0.0, -1.0, 0.0), Vec3::ONE, 1.0).with_debug(true);
        let chunk = light.chunk(&view);
        assert_eq!(chunk.position, [0.0, -1.0, 0.0]);
        assert_eq!(chunk.debug, 1.0);
    }
}

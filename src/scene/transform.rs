//! Object placement in world space

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::uniform::ModelChunk;

/// Position, rotation and scale of an object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            ..Default::default()
        }
    }

    /// Create transform from position, rotation (euler angles in radians), and scale
    pub fn from_components(position: Vec3, rotation_euler: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::from_euler(
                EulerRot::XYZ,
                rotation_euler.x,
                rotation_euler.y,
                rotation_euler.z,
            ),
            scale,
        }
    }

    /// Get the model matrix for this transform
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Get the normal matrix (inverse transpose of model matrix)
    pub fn normal_matrix(&self) -> Mat4 {
        self.matrix().inverse().transpose()
    }

    /// Rotate around an axis
    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        let delta = Quat::from_axis_angle(axis, angle);
        self.rotation = delta * self.rotation;
    }

    /// Per-object record for the model block
    pub fn chunk(&self) -> ModelChunk {
        ModelChunk {
            model: self.matrix(),
            normal: self.normal_matrix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_matrix_undoes_non_uniform_scale() {
        let transform = Transform::from_position_scale(Vec3::new(1.0, 2.0, 3.0), Vec3::new(2.0, 1.0, 1.0));
        let normal = transform.normal_matrix().transform_vector3(Vec3::X);
        assert!((normal - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn chunk_carries_both_matrices() {
        let transform = Transform::from_position(Vec3::new(0.0, 1.0, 0.0));
        let chunk = transform.chunk();
        assert_eq!(chunk.model, transform.matrix());
        assert_eq!(chunk.normal, transform.normal_matrix());
    }
}

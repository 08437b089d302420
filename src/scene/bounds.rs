//! Axis-aligned bounding boxes

use glam::{Mat4, Vec3};

/// Axis-aligned box given by its minimum and maximum corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point. An empty iterator gives a degenerate box at
    /// the origin.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return Self::new(Vec3::ZERO, Vec3::ZERO);
        };
        points.fold(Self::new(first, first), |aabb, p| {
            Self::new(aabb.min.min(p), aabb.max.max(p))
        })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Bounds of this box after `matrix` is applied to it
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        let corners = (0..8).map(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        });
        Self::from_points(corners.map(|c| matrix.transform_point3(c)))
    }

    /// Whether the interiors overlap. Boxes that only touch do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmplt(other.max).all() && other.min.cmplt(self.max).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touching_boxes_do_not_intersect() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = Aabb::new(Vec3::splat(0.5), Vec3::splat(1.5));
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
        assert!(c.intersects(&a));
    }

    #[test]
    fn transform_moves_and_scales() {
        let unit = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            glam::Quat::IDENTITY,
            Vec3::new(0.0, 1.0, 0.0),
        );
        let moved = unit.transformed(&matrix);
        assert_eq!(moved.min, Vec3::new(-1.0, 0.0, -1.0));
        assert_eq!(moved.max, Vec3::new(1.0, 2.0, 1.0));
        assert_eq!(moved.center(), Vec3::new(0.0, 1.0, 0.0));
    }
}

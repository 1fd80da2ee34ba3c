//! Instance transforms in the 3x4 row-major layout TLAS instances use

use bytemuck::{Pod, Zeroable};
use glam::{Affine3A, Mat4, Quat, Vec3};

/// Row-major 3x4 affine transform of one TLAS instance
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceMatrix {
    pub rows: [[f32; 4]; 3],
}

impl InstanceMatrix {
    pub const IDENTITY: InstanceMatrix = InstanceMatrix {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    /// Build from translation, rotation and scale
    pub fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self::from_affine(&Affine3A::from_scale_rotation_translation(scale, rotation, translation))
    }

    pub fn from_translation(translation: Vec3) -> Self {
        let mut m = Self::IDENTITY;
        m.set_translation(translation);
        m
    }

    pub fn from_affine(affine: &Affine3A) -> Self {
        let m = Mat4::from(*affine);
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        Self {
            rows: [r0.to_array(), r1.to_array(), r2.to_array()],
        }
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.rows[0][3], self.rows[1][3], self.rows[2][3])
    }

    pub fn set_translation(&mut self, translation: Vec3) {
        self.rows[0][3] = translation.x;
        self.rows[1][3] = translation.y;
        self.rows[2][3] = translation.z;
    }

    /// Apply the transform to a point
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        let row = |r: &[f32; 4]| r[0] * p.x + r[1] * p.y + r[2] * p.z + r[3];
        Vec3::new(row(&self.rows[0]), row(&self.rows[1]), row(&self.rows[2]))
    }
}

impl Default for InstanceMatrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_translation() {
        let m = InstanceMatrix::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.translation(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(m.transform_point(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_scale_rotation_translation() {
        let m = InstanceMatrix::new(
            Vec3::new(0.0, 5.0, 0.0),
            Quat::from_rotation_y(FRAC_PI_2),
            Vec3::splat(2.0),
        );
        // +X rotated a quarter turn about Y points to -Z
        let p = m.transform_point(Vec3::X);
        assert!((p - Vec3::new(0.0, 5.0, -2.0)).length() < 1e-5);
    }

    #[test]
    fn test_layout_is_48_bytes() {
        assert_eq!(std::mem::size_of::<InstanceMatrix>(), 48);
    }
}

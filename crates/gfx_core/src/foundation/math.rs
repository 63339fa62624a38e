//! Math utilities and types
//!
//! Provides the 2D math types used by the graphics stack.

pub use nalgebra::{Matrix3, Vector2};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3x3 matrix type (homogeneous 2D)
pub type Mat3 = Matrix3<f32>;

/// 2D affine transform stored as a homogeneous 3x3 matrix
///
/// Operations post-multiply, so `t.translate(..); t.rotate(..)` rotates
/// geometry first and then translates it, matching how scripts nest calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform2D {
    matrix: Mat3,
}

impl Transform2D {
    /// The identity transform
    pub fn identity() -> Self {
        Self { matrix: Mat3::identity() }
    }

    /// Wrap an existing homogeneous matrix
    pub const fn from_matrix(matrix: Mat3) -> Self {
        Self { matrix }
    }

    /// Build a transform from a position, rotation, scale, origin offset and shear
    pub fn from_components(
        x: f32,
        y: f32,
        angle: f32,
        sx: f32,
        sy: f32,
        ox: f32,
        oy: f32,
        kx: f32,
        ky: f32,
    ) -> Self {
        let mut t = Self::identity();
        t.translate(x, y);
        t.rotate(angle);
        t.scale(sx, sy);
        t.shear(kx, ky);
        t.translate(-ox, -oy);
        t
    }

    /// The underlying matrix
    pub const fn matrix(&self) -> &Mat3 {
        &self.matrix
    }

    /// Reset to identity
    pub fn set_identity(&mut self) {
        self.matrix = Mat3::identity();
    }

    /// Append a translation
    pub fn translate(&mut self, x: f32, y: f32) {
        self.matrix *= Mat3::new_translation(&Vec2::new(x, y));
    }

    /// Append a rotation (radians)
    pub fn rotate(&mut self, angle: f32) {
        self.matrix *= Mat3::new_rotation(angle);
    }

    /// Append a non-uniform scale
    pub fn scale(&mut self, sx: f32, sy: f32) {
        self.matrix *= Mat3::new_nonuniform_scaling(&Vec2::new(sx, sy));
    }

    /// Append a shear
    pub fn shear(&mut self, kx: f32, ky: f32) {
        #[rustfmt::skip]
        let shear = Mat3::new(
            1.0, kx,  0.0,
            ky,  1.0, 0.0,
            0.0, 0.0, 1.0,
        );
        self.matrix *= shear;
    }

    /// `self * other`: apply `other` first, then `self`
    pub fn then(&self, other: &Self) -> Self {
        Self { matrix: self.matrix * other.matrix }
    }

    /// Transform a point
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.matrix;
        (
            m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)],
            m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)],
        )
    }

    /// The inverse transform, if the matrix is invertible
    pub fn inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().map(Self::from_matrix)
    }

    /// Rough per-axis scale factors, ignoring rotation
    pub fn approximate_scale(&self) -> (f32, f32) {
        let m = &self.matrix;
        let sx = m[(0, 0)].hypot(m[(0, 1)]);
        let sy = m[(1, 0)].hypot(m[(1, 1)]);
        (sx, sy)
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_translate_then_scale_order() {
        let mut t = Transform2D::identity();
        t.translate(10.0, 5.0);
        t.scale(2.0, 3.0);

        let (x, y) = t.transform_point(1.0, 1.0);
        assert_relative_eq!(x, 12.0);
        assert_relative_eq!(y, 8.0);
    }

    #[test]
    fn test_rotation_quarter_turn() {
        let mut t = Transform2D::identity();
        t.rotate(std::f32::consts::FRAC_PI_2);

        let (x, y) = t.transform_point(1.0, 0.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = Transform2D::from_components(3.0, 4.0, 0.3, 2.0, 0.5, 1.0, 1.0, 0.1, 0.0);
        let inv = t.inverse().unwrap();

        let (x, y) = t.transform_point(7.0, -2.0);
        let (bx, by) = inv.transform_point(x, y);
        assert_relative_eq!(bx, 7.0, epsilon = 1e-4);
        assert_relative_eq!(by, -2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_approximate_scale() {
        let mut t = Transform2D::identity();
        t.scale(2.0, 4.0);
        let (sx, sy) = t.approximate_scale();
        assert_relative_eq!(sx, 2.0);
        assert_relative_eq!(sy, 4.0);
    }
}

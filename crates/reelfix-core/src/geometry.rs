//! Geometric primitives: similarity motion transforms and pixel rectangles.

use glam::{DAffine2, DMat2, DVec2};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Axis-aligned rectangle in integer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Create a new rectangle.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle left after removing `border` pixels from every edge of a
    /// `width x height` image. Collapses to an empty rectangle rather than
    /// going negative.
    pub fn inset(width: u32, height: u32, border: u32) -> Self {
        let x1 = width.saturating_sub(border).max(border);
        let y1 = height.saturating_sub(border).max(border);
        let x0 = border.min(x1);
        let y0 = border.min(y1);
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }
}

/// Frame-to-frame similarity motion: translation in pixels plus rotation in
/// radians. Used both for raw estimates and for corrective transforms.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub dx: f64,
    pub dy: f64,
    pub da: f64,
}

impl Transform {
    /// Identity transform.
    pub const IDENTITY: Self = Self {
        dx: 0.0,
        dy: 0.0,
        da: 0.0,
    };

    #[inline]
    pub const fn new(dx: f64, dy: f64, da: f64) -> Self {
        Self { dx, dy, da }
    }

    #[inline]
    pub fn is_identity(self) -> bool {
        self == Self::IDENTITY
    }

    /// The 2x3 affine matrix `[[cos da, -sin da, dx], [sin da, cos da, dy]]`.
    pub fn to_affine(self) -> DAffine2 {
        let (sin, cos) = self.da.sin_cos();
        DAffine2 {
            matrix2: DMat2::from_cols(DVec2::new(cos, sin), DVec2::new(-sin, cos)),
            translation: DVec2::new(self.dx, self.dy),
        }
    }

    /// Recover `(dx, dy, da)` from an affine matrix: translation column as-is,
    /// angle from the rotation sub-block. Any uniform scale is discarded.
    pub fn from_affine(m: &DAffine2) -> Self {
        Self {
            dx: m.translation.x,
            dy: m.translation.y,
            da: m.matrix2.x_axis.y.atan2(m.matrix2.x_axis.x),
        }
    }
}

impl Add for Transform {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.dx + rhs.dx, self.dy + rhs.dy, self.da + rhs.da)
    }
}

impl Sub for Transform {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.dx - rhs.dx, self.dy - rhs.dy, self.da - rhs.da)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_round_trip() {
        let t = Transform::new(3.5, -2.0, 0.1);
        let back = Transform::from_affine(&t.to_affine());
        assert!((back.dx - 3.5).abs() < 1e-12);
        assert!((back.dy + 2.0).abs() < 1e-12);
        assert!((back.da - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_identity_affine() {
        let m = Transform::IDENTITY.to_affine();
        assert_eq!(m, DAffine2::IDENTITY);
        let p = m.transform_point2(DVec2::new(7.0, 9.0));
        assert_eq!(p, DVec2::new(7.0, 9.0));
    }

    #[test]
    fn test_rotation_direction() {
        let m = Transform::new(0.0, 0.0, std::f64::consts::FRAC_PI_2).to_affine();
        let p = m.transform_point2(DVec2::new(1.0, 0.0));
        assert!(p.x.abs() < 1e-12);
        assert!((p.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_inset() {
        assert_eq!(PixelRect::inset(100, 60, 20), PixelRect::new(20, 20, 60, 20));
        assert_eq!(PixelRect::inset(30, 30, 20).width, 0);
        assert_eq!(PixelRect::inset(10, 10, 0), PixelRect::new(0, 0, 10, 10));
    }
}

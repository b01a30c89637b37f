//! Projective 3x3 transforms between frame pixel coordinates.

use std::ops::Mul;

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Determinants below this are treated as singular.
const SINGULAR_DET: f64 = 1e-12;

/// Row-major 3x3 projective matrix mapping a frame's pixel coordinates into
/// the reference frame:
///
/// ```text
/// | h0 h1 h2 |   | x |
/// | h3 h4 h5 | * | y |
/// | h6 h7 h8 |   | 1 |
/// ```
///
/// Pixel `(x, y)` covers `[x, x + 1) × [y, y + 1)`, so its centre is `(x + 0.5, y + 0.5)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    data: [f64; 9],
}

impl Homography {
    #[inline]
    pub const fn from_array(data: [f64; 9]) -> Self {
        Self { data }
    }

    #[inline]
    pub const fn identity() -> Self {
        Self {
            data: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    #[inline]
    pub const fn translation(dx: f64, dy: f64) -> Self {
        Self {
            data: [1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0],
        }
    }

    #[inline]
    pub const fn scaling(sx: f64, sy: f64) -> Self {
        Self {
            data: [sx, 0.0, 0.0, 0.0, sy, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Uniform scale and rotation (radians) about the origin, then translation.
    pub fn similarity(scale: f64, rotation: f64, dx: f64, dy: f64) -> Self {
        let (sin, cos) = rotation.sin_cos();
        Self {
            data: [
                scale * cos,
                -scale * sin,
                dx,
                scale * sin,
                scale * cos,
                dy,
                0.0,
                0.0,
                1.0,
            ],
        }
    }

    #[inline]
    pub const fn as_array(&self) -> &[f64; 9] {
        &self.data
    }

    /// Whether the bottom row is `[0, 0, 1]` (up to scale).
    pub fn is_affine(&self) -> bool {
        let d = &self.data;
        d[6].abs() < 1e-15 && d[7].abs() < 1e-15 && (d[8] - 1.0).abs() < 1e-15
    }

    #[inline]
    pub fn apply(&self, p: DVec2) -> DVec2 {
        let d = &self.data;
        let x = d[0] * p.x + d[1] * p.y + d[2];
        let y = d[3] * p.x + d[4] * p.y + d[5];
        let w = d[6] * p.x + d[7] * p.y + d[8];
        DVec2::new(x / w, y / w)
    }

    pub fn determinant(&self) -> f64 {
        let d = &self.data;
        d[0] * (d[4] * d[8] - d[5] * d[7]) - d[1] * (d[3] * d[8] - d[5] * d[6])
            + d[2] * (d[3] * d[7] - d[4] * d[6])
    }

    /// Adjugate inverse; `None` when the matrix is singular.
    pub fn inverse(&self) -> Option<Homography> {
        let det = self.determinant();
        if det.abs() < SINGULAR_DET {
            return None;
        }
        let d = &self.data;
        let inv = 1.0 / det;
        Some(Self {
            data: [
                (d[4] * d[8] - d[5] * d[7]) * inv,
                (d[2] * d[7] - d[1] * d[8]) * inv,
                (d[1] * d[5] - d[2] * d[4]) * inv,
                (d[5] * d[6] - d[3] * d[8]) * inv,
                (d[0] * d[8] - d[2] * d[6]) * inv,
                (d[2] * d[3] - d[0] * d[5]) * inv,
                (d[3] * d[7] - d[4] * d[6]) * inv,
                (d[1] * d[6] - d[0] * d[7]) * inv,
                (d[0] * d[4] - d[1] * d[3]) * inv,
            ],
        })
    }

    /// `self * rhs`: applies `rhs` first, then `self`.
    pub fn then_after(&self, rhs: &Homography) -> Homography {
        let a = &self.data;
        let b = &rhs.data;
        let mut out = [0.0; 9];
        for r in 0..3 {
            for c in 0..3 {
                out[r * 3 + c] = (0..3).map(|k| a[r * 3 + k] * b[k * 3 + c]).sum();
            }
        }
        Homography { data: out }
    }

    /// Absolute area magnification at `p` by central differences.
    pub fn local_area_scale(&self, p: DVec2) -> f64 {
        let h = 0.5;
        let dx = self.apply(p + DVec2::new(h, 0.0)) - self.apply(p - DVec2::new(h, 0.0));
        let dy = self.apply(p + DVec2::new(0.0, h)) - self.apply(p - DVec2::new(0.0, h));
        dx.perp_dot(dy).abs()
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Homography {
    type Output = Homography;

    #[inline]
    fn mul(self, rhs: Homography) -> Homography {
        self.then_after(&rhs)
    }
}

impl Mul<DVec2> for Homography {
    type Output = DVec2;

    #[inline]
    fn mul(self, rhs: DVec2) -> DVec2 {
        self.apply(rhs)
    }
}

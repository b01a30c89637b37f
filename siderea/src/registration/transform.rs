//! Least-squares transforms from matched star pairs.
//!
//! Both fits map target coordinates onto reference coordinates, the direction
//! stacking and drizzle expect of a frame's homography.

use glam::DVec2;

use crate::math::{Homography, Matrix};

use super::StarPair;

/// Affine fit: `reference ≈ A · target + t`. Needs three non-collinear pairs.
pub fn fit_affine(pairs: &[StarPair]) -> Option<Homography> {
    if pairs.len() < 3 {
        return None;
    }
    let (target, target_norm) = normalize(pairs.iter().map(|p| p.target));
    let (reference, reference_norm) = normalize(pairs.iter().map(|p| p.reference));

    let design = Matrix::from_vec(
        pairs.len(),
        3,
        target.iter().flat_map(|p| [p.x, p.y, 1.0]).collect(),
    );
    let xs: Vec<f64> = reference.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = reference.iter().map(|p| p.y).collect();
    let row_x = design.least_squares(&xs)?;
    let row_y = design.least_squares(&ys)?;

    let normalized = Homography::from_array([
        row_x[0], row_x[1], row_x[2], row_y[0], row_y[1], row_y[2], 0.0, 0.0, 1.0,
    ]);
    denormalize(&normalized, &target_norm, &reference_norm)
}

/// Projective fit by the direct linear transform with `h33 = 1`. Needs four
/// pairs, no three of them collinear.
pub fn fit_homography(pairs: &[StarPair]) -> Option<Homography> {
    if pairs.len() < 4 {
        return None;
    }
    let (target, target_norm) = normalize(pairs.iter().map(|p| p.target));
    let (reference, reference_norm) = normalize(pairs.iter().map(|p| p.reference));

    let mut rows = Vec::with_capacity(pairs.len() * 16);
    let mut rhs = Vec::with_capacity(pairs.len() * 2);
    for (t, r) in target.iter().zip(&reference) {
        rows.extend_from_slice(&[t.x, t.y, 1.0, 0.0, 0.0, 0.0, -t.x * r.x, -t.y * r.x]);
        rhs.push(r.x);
        rows.extend_from_slice(&[0.0, 0.0, 0.0, t.x, t.y, 1.0, -t.x * r.y, -t.y * r.y]);
        rhs.push(r.y);
    }
    let h = Matrix::from_vec(pairs.len() * 2, 8, rows).least_squares(&rhs)?;

    let normalized = Homography::from_array([h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0]);
    denormalize(&normalized, &target_norm, &reference_norm)
}

/// Root-mean-square distance between `H · target` and `reference`.
pub fn rms_error(pairs: &[StarPair], homography: &Homography) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let sum: f64 = pairs
        .iter()
        .map(|p| homography.apply(p.target).distance_squared(p.reference))
        .sum();
    (sum / pairs.len() as f64).sqrt()
}

/// Centres the points and scales their mean distance from the origin to √2.
fn normalize(points: impl Iterator<Item = DVec2>) -> (Vec<DVec2>, Homography) {
    let points: Vec<DVec2> = points.collect();
    let centroid = points.iter().copied().sum::<DVec2>() / points.len() as f64;
    let mean_distance =
        points.iter().map(|p| p.distance(centroid)).sum::<f64>() / points.len() as f64;
    let scale = if mean_distance > 1e-12 {
        std::f64::consts::SQRT_2 / mean_distance
    } else {
        1.0
    };
    let normalized = points.iter().map(|&p| (p - centroid) * scale).collect();
    let transform = Homography::from_array([
        scale,
        0.0,
        -centroid.x * scale,
        0.0,
        scale,
        -centroid.y * scale,
        0.0,
        0.0,
        1.0,
    ]);
    (normalized, transform)
}

/// `T_ref⁻¹ · H · T_target`, rescaled so `h33 = 1`.
fn denormalize(
    normalized: &Homography,
    target_norm: &Homography,
    reference_norm: &Homography,
) -> Option<Homography> {
    let h = reference_norm
        .inverse()?
        .then_after(normalized)
        .then_after(target_norm);
    let d = h.as_array();
    if d[8].abs() < 1e-12 {
        return None;
    }
    let result = Homography::from_array(d.map(|v| v / d[8]));
    (result.determinant().abs() > 1e-12 && result.as_array().iter().all(|v| v.is_finite()))
        .then_some(result)
}

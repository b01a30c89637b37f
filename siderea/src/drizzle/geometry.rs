//! Exact overlap between a projected drop and an output pixel.
//!
//! The overlap of a convex quadrilateral with the unit square is the sum,
//! over the quadrilateral's edges, of the signed area between each edge
//! (clipped to the square's columns) and the x-axis, capped at height 1
//! (Green's theorem). Pixel `(ox, oy)` covers `[ox, ox + 1) × [oy, oy + 1)`.

use glam::DVec2;

/// Slopes flatter than this are treated as vertical edges, which enclose no area.
const VERTICAL_EDGE: f64 = 1e-14;

/// Signed area between segment `a → b` and the x-axis, restricted to the unit
/// square. Positive when the segment runs towards +x.
pub(crate) fn sgarea(a: DVec2, b: DVec2) -> f64 {
    let dx = b.x - a.x;
    if dx.abs() < VERTICAL_EDGE {
        return 0.0;
    }
    let sign = dx.signum();
    let (mut x_lo, mut x_hi) = if dx < 0.0 { (b.x, a.x) } else { (a.x, b.x) };
    if x_lo >= 1.0 || x_hi <= 0.0 {
        return 0.0;
    }
    x_lo = x_lo.max(0.0);
    x_hi = x_hi.min(1.0);

    let slope = (b.y - a.y) / dx;
    let intercept = a.y - slope * a.x;
    let mut y_lo = slope * x_lo + intercept;
    let mut y_hi = slope * x_hi + intercept;

    if y_lo <= 0.0 && y_hi <= 0.0 {
        return 0.0;
    }
    if y_lo >= 1.0 && y_hi >= 1.0 {
        return sign * (x_hi - x_lo);
    }

    // Cut the part below the x-axis.
    if y_lo < 0.0 {
        x_lo = -intercept / slope;
        y_lo = 0.0;
    } else if y_hi < 0.0 {
        x_hi = -intercept / slope;
        y_hi = 0.0;
    }

    if y_lo <= 1.0 {
        if y_hi <= 1.0 {
            return sign * 0.5 * (x_hi - x_lo) * (y_hi + y_lo);
        }
        // Leaves through the top.
        let x_top = (1.0 - intercept) / slope;
        return sign * (0.5 * (x_top - x_lo) * (1.0 + y_lo) + x_hi - x_top);
    }

    // Enters through the top.
    let x_top = (1.0 - intercept) / slope;
    sign * (0.5 * (x_hi - x_top) * (1.0 + y_hi) + x_top - x_lo)
}

/// Overlap area of the convex quadrilateral `quad` with output pixel `(ox, oy)`.
/// Either winding order works.
pub(crate) fn boxer(ox: f64, oy: f64, quad: &[DVec2; 4]) -> f64 {
    let origin = DVec2::new(ox, oy);
    let local = quad.map(|p| p - origin);
    let sum: f64 = (0..4).map(|i| sgarea(local[i], local[(i + 1) % 4])).sum();
    sum.abs()
}

/// Shoelace area of a simple quadrilateral.
pub(crate) fn quad_area(quad: &[DVec2; 4]) -> f64 {
    let twice: f64 = (0..4).map(|i| quad[i].perp_dot(quad[(i + 1) % 4])).sum();
    0.5 * twice.abs()
}

/// Overlap area of two axis-aligned rectangles given as `(min, max)` corners.
#[inline]
pub(crate) fn rect_overlap(a_min: DVec2, a_max: DVec2, b_min: DVec2, b_max: DVec2) -> f64 {
    let w = (a_max.x.min(b_max.x) - a_min.x.max(b_min.x)).max(0.0);
    let h = (a_max.y.min(b_max.y) - a_min.y.max(b_min.y)).max(0.0);
    w * h
}

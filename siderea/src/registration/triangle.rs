use glam::DVec2;

/// Sides shorter than this make a triangle degenerate.
const MIN_SIDE: f64 = 1e-9;

/// Twice the area divided by the squared longest side. Below this the
/// vertices are treated as collinear.
const MIN_RELATIVE_AREA: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Orientation {
    Clockwise,
    CounterClockwise,
}

/// Similarity-invariant descriptor of three stars.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Triangle {
    /// Star indices ordered by the length of the opposite side: the vertex
    /// facing the shortest side first, the one facing the longest side last.
    pub indices: [usize; 3],
    /// Middle side / longest side.
    pub rx: f64,
    /// Shortest side / longest side.
    pub ry: f64,
    /// Winding of the vertices in `indices` order.
    pub orientation: Orientation,
}

impl Triangle {
    /// `None` for zero-length sides, collinear points and triangles whose
    /// longest / shortest side exceeds `max_side_ratio`.
    pub fn new(indices: [usize; 3], positions: [DVec2; 3], max_side_ratio: f64) -> Option<Self> {
        let [p0, p1, p2] = positions;
        // Each side is keyed by the vertex opposite to it.
        let mut sides = [
            (p1.distance(p2), 0usize),
            (p2.distance(p0), 1),
            (p0.distance(p1), 2),
        ];
        sides.sort_by(|a, b| a.0.total_cmp(&b.0));

        let (shortest, middle, longest) = (sides[0].0, sides[1].0, sides[2].0);
        if shortest < MIN_SIDE {
            return None;
        }
        if longest / shortest > max_side_ratio {
            return None;
        }

        let order = [sides[0].1, sides[1].1, sides[2].1];
        let a = positions[order[0]];
        let b = positions[order[1]];
        let c = positions[order[2]];
        let cross = (b - a).perp_dot(c - a);
        if cross.abs() < MIN_RELATIVE_AREA * longest * longest {
            return None;
        }

        Some(Self {
            indices: [indices[order[0]], indices[order[1]], indices[order[2]]],
            rx: middle / longest,
            ry: shortest / longest,
            orientation: if cross > 0.0 {
                Orientation::CounterClockwise
            } else {
                Orientation::Clockwise
            },
        })
    }
}

/// All non-degenerate triangles over the first `positions.len()` stars.
pub(crate) fn build_triangles(positions: &[DVec2], max_side_ratio: f64) -> Vec<Triangle> {
    let n = positions.len();
    let mut triangles = Vec::with_capacity(n * n.saturating_sub(1) * n.saturating_sub(2) / 6);
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                if let Some(t) = Triangle::new(
                    [i, j, k],
                    [positions[i], positions[j], positions[k]],
                    max_side_ratio,
                ) {
                    triangles.push(t);
                }
            }
        }
    }
    triangles
}

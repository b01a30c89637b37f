//! Candidate extraction: threshold the structure map and keep the peak of
//! every 8-connected region above it.

use common::Buffer2;

/// Threshold floor as a fraction of the strongest structure response, so that
/// noise-free maps do not turn rounding residue into candidates.
const RESPONSE_FLOOR_FRACTION: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: usize,
    pub y: usize,
    /// Structure-map value at the peak.
    pub response: f32,
    /// Pixels in the connected region.
    pub area: usize,
}

/// Detection threshold for a structure map with the given noise.
pub(crate) fn detection_threshold(map: &Buffer2<f32>, noise: f32, detection_sigma: f32) -> f32 {
    let max_response = map.iter().copied().fold(0.0f32, f32::max);
    (detection_sigma * noise).max(RESPONSE_FLOOR_FRACTION * max_response)
}

/// One candidate per connected region of `map > threshold`, ordered by
/// descending response.
pub(crate) fn find_candidates(map: &Buffer2<f32>, threshold: f32) -> Vec<Candidate> {
    let width = map.width();
    let height = map.height();
    let (labels, count) = label_regions(map, threshold);
    if count == 0 {
        return Vec::new();
    }

    let mut candidates = vec![
        Candidate {
            x: 0,
            y: 0,
            response: f32::MIN,
            area: 0,
        };
        count
    ];
    for y in 0..height {
        for x in 0..width {
            let label = labels[(x, y)];
            if label == 0 {
                continue;
            }
            let candidate = &mut candidates[(label - 1) as usize];
            candidate.area += 1;
            let value = map[(x, y)];
            if value > candidate.response {
                candidate.response = value;
                candidate.x = x;
                candidate.y = y;
            }
        }
    }

    candidates.sort_by(|a, b| b.response.total_cmp(&a.response));
    candidates
}

/// Two-pass union-find labelling with 8-connectivity. Returns labels
/// `1..=count` (0 = background) and `count`.
fn label_regions(map: &Buffer2<f32>, threshold: f32) -> (Buffer2<u32>, usize) {
    let width = map.width();
    let height = map.height();
    let mut labels = Buffer2::new_default(width, height);
    let mut parent: Vec<u32> = Vec::new();

    for y in 0..height {
        for x in 0..width {
            if map[(x, y)] <= threshold {
                continue;
            }

            let mut label = 0u32;
            let mut neighbours = [0u32; 4];
            if x > 0 {
                neighbours[0] = labels[(x - 1, y)];
            }
            if y > 0 {
                neighbours[1] = labels[(x, y - 1)];
                if x > 0 {
                    neighbours[2] = labels[(x - 1, y - 1)];
                }
                if x + 1 < width {
                    neighbours[3] = labels[(x + 1, y - 1)];
                }
            }

            for &n in neighbours.iter().filter(|&&n| n != 0) {
                if label == 0 {
                    label = find(&parent, n);
                } else {
                    label = union(&mut parent, label, n);
                }
            }

            if label == 0 {
                parent.push(parent.len() as u32 + 1);
                label = parent.len() as u32;
            }
            labels[(x, y)] = label;
        }
    }

    let mut compact = vec![0u32; parent.len() + 1];
    let mut count = 0u32;
    for label in labels.iter_mut().filter(|l| **l != 0) {
        let root = find(&parent, *label) as usize;
        if compact[root] == 0 {
            count += 1;
            compact[root] = count;
        }
        *label = compact[root];
    }

    (labels, count as usize)
}

fn find(parent: &[u32], mut label: u32) -> u32 {
    while parent[(label - 1) as usize] != label {
        label = parent[(label - 1) as usize];
    }
    label
}

/// Joins two sets under the smaller root and returns it.
fn union(parent: &mut [u32], a: u32, b: u32) -> u32 {
    let root_a = find(parent, a);
    let root_b = find(parent, b);
    let (low, high) = if root_a < root_b {
        (root_a, root_b)
    } else {
        (root_b, root_a)
    };
    parent[(high - 1) as usize] = low;
    low
}

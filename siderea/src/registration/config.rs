//! Triangle matching configuration.

use serde::{Deserialize, Serialize};

/// Parameters of triangle-similarity star matching.
///
/// All triples of the brightest `max_stars` stars are enumerated, so the
/// triangle count grows as `max_stars³ / 6`. 30 stars give 4060 triangles per list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Brightest N stars of each list taken into triangles.
    pub max_stars: usize,
    /// Maximum difference of each side ratio for two triangles to be similar.
    pub tolerance: f64,
    /// Votes a star pair needs before it is accepted.
    pub min_votes: usize,
    /// Longest / shortest side above this drops the triangle; its ratios are too noise-sensitive.
    pub max_side_ratio: f64,
    /// Only triangles with the same winding match. Disable for mirrored frames.
    pub check_orientation: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_stars: 30,
            tolerance: 0.002,
            min_votes: 3,
            max_side_ratio: 10.0,
            check_orientation: true,
        }
    }
}

impl MatchConfig {
    /// Wider tolerance for noisy centroids from undersampled or faint stars.
    pub fn noisy() -> Self {
        Self {
            tolerance: 0.005,
            min_votes: 5,
            ..Default::default()
        }
    }

    /// Accepts reflected star fields (e.g. frames flipped by a diagonal mirror).
    pub fn mirrored() -> Self {
        Self {
            check_orientation: false,
            ..Default::default()
        }
    }

    pub fn with_max_stars(mut self, max_stars: usize) -> Self {
        self.max_stars = max_stars;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_min_votes(mut self, min_votes: usize) -> Self {
        self.min_votes = min_votes;
        self
    }

    pub fn validate(&self) {
        assert!(
            self.max_stars >= 3,
            "max_stars must be >= 3 for triangle matching, got {}",
            self.max_stars
        );
        assert!(
            self.tolerance > 0.0 && self.tolerance < 1.0,
            "tolerance must be in (0, 1), got {}",
            self.tolerance
        );
        assert!(self.min_votes >= 1, "min_votes must be at least 1");
        assert!(
            self.max_side_ratio > 1.0,
            "max_side_ratio must be greater than 1, got {}",
            self.max_side_ratio
        );
    }
}

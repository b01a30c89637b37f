//! Star-pattern matching by triangle similarity.
//!
//! Triangles built from the brightest stars of each list are described by
//! their side ratios, which survive rotation, uniform scale and translation.
//! Similar triangle pairs vote for their vertex correspondences and the
//! consistent winners become star pairs for a transform fit.

mod config;
pub mod transform;
mod triangle;
mod voting;


use glam::DVec2;

use crate::star_detection::Star;

pub use config::MatchConfig;
pub use transform::{fit_affine, fit_homography, rms_error};

use triangle::build_triangles;
use voting::{resolve_conflicts, vote};

/// A reference star and the target star it corresponds to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StarPair {
    pub reference_index: usize,
    pub target_index: usize,
    pub reference: DVec2,
    pub target: DVec2,
    /// Triangle votes supporting the pair.
    pub votes: u32,
}

pub type StarPairVector = Vec<StarPair>;

/// Finds star correspondences between two luminance-sorted star lists.
///
/// Returns an empty vector when either list has fewer than three stars.
/// Pairs are ordered by reference index; indices refer to the input lists.
pub fn match_stars(reference: &[Star], target: &[Star], config: &MatchConfig) -> StarPairVector {
    config.validate();

    let reference_positions: Vec<DVec2> = reference
        .iter()
        .take(config.max_stars)
        .map(Star::pos)
        .collect();
    let target_positions: Vec<DVec2> = target.iter().take(config.max_stars).map(Star::pos).collect();

    if reference_positions.len() < 3 || target_positions.len() < 3 {
        tracing::debug!(
            reference = reference.len(),
            target = target.len(),
            "Too few stars for triangle matching"
        );
        return Vec::new();
    }

    let reference_triangles = build_triangles(&reference_positions, config.max_side_ratio);
    let mut target_triangles = build_triangles(&target_positions, config.max_side_ratio);
    target_triangles.sort_by(|a, b| a.rx.total_cmp(&b.rx));

    let votes = vote(
        &reference_triangles,
        &target_triangles,
        reference_positions.len(),
        target_positions.len(),
        config,
    );
    let winners = votes.top_vote_stars(config.min_votes);
    let pairs: StarPairVector = resolve_conflicts(&winners, target_positions.len())
        .into_iter()
        .map(|(reference_index, target_index, votes)| StarPair {
            reference_index,
            target_index,
            reference: reference_positions[reference_index],
            target: target_positions[target_index],
            votes,
        })
        .collect();

    tracing::debug!(
        reference_triangles = reference_triangles.len(),
        target_triangles = target_triangles.len(),
        pairs = pairs.len(),
        "Triangle matching finished"
    );

    pairs
}

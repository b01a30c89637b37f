use rayon::prelude::*;

use super::config::MatchConfig;
use super::triangle::Triangle;

/// Reference triangles voted by one worker before its matrix is merged.
const VOTE_SHARD: usize = 256;

/// Dense vote counts indexed `[target][reference]`.
#[derive(Debug, Clone)]
pub(crate) struct VoteMatrix {
    votes: Vec<u32>,
    reference_count: usize,
    target_count: usize,
}

impl VoteMatrix {
    pub fn new(reference_count: usize, target_count: usize) -> Self {
        Self {
            votes: vec![0; reference_count * target_count],
            reference_count,
            target_count,
        }
    }

    #[inline]
    pub fn increment(&mut self, target: usize, reference: usize) {
        self.votes[target * self.reference_count + reference] += 1;
    }

    #[inline]
    pub fn get(&self, target: usize, reference: usize) -> u32 {
        self.votes[target * self.reference_count + reference]
    }

    pub fn merge(mut self, other: VoteMatrix) -> Self {
        debug_assert_eq!(self.votes.len(), other.votes.len());
        for (a, b) in self.votes.iter_mut().zip(&other.votes) {
            *a += b;
        }
        self
    }

    /// Best target per reference star, provided it has at least `min_votes`
    /// and no other target shares the top count.
    pub fn top_vote_stars(&self, min_votes: usize) -> Vec<Option<(usize, u32)>> {
        (0..self.reference_count)
            .map(|reference| {
                let mut best: Option<(usize, u32)> = None;
                let mut tied = false;
                for target in 0..self.target_count {
                    let votes = self.get(target, reference);
                    match best {
                        Some((_, top)) if votes == top => tied = true,
                        Some((_, top)) if votes < top => {}
                        _ => {
                            best = Some((target, votes));
                            tied = false;
                        }
                    }
                }
                best.filter(|&(_, votes)| !tied && votes as usize >= min_votes)
            })
            .collect()
    }
}

/// Casts one vote per vertex correspondence for every similar triangle pair.
///
/// `targets` must be sorted by `rx`.
pub(crate) fn vote(
    references: &[Triangle],
    targets: &[Triangle],
    reference_count: usize,
    target_count: usize,
    config: &MatchConfig,
) -> VoteMatrix {
    debug_assert!(targets.windows(2).all(|w| w[0].rx <= w[1].rx));
    let tolerance = config.tolerance;

    references
        .par_chunks(VOTE_SHARD)
        .fold(
            || VoteMatrix::new(reference_count, target_count),
            |mut matrix, shard| {
                for r in shard {
                    let start = targets.partition_point(|t| t.rx < r.rx - tolerance);
                    let end = targets.partition_point(|t| t.rx <= r.rx + tolerance);
                    for t in &targets[start..end] {
                        if (t.ry - r.ry).abs() >= tolerance || (t.rx - r.rx).abs() >= tolerance {
                            continue;
                        }
                        if config.check_orientation && t.orientation != r.orientation {
                            continue;
                        }
                        for (&ti, &ri) in t.indices.iter().zip(&r.indices) {
                            matrix.increment(ti, ri);
                        }
                    }
                }
                matrix
            },
        )
        .reduce(
            || VoteMatrix::new(reference_count, target_count),
            VoteMatrix::merge,
        )
}

/// One-to-one assignment from per-reference winners. When several reference
/// stars claim the same target the strictly highest vote count keeps it and
/// equal top counts drop every claimant.
pub(crate) fn resolve_conflicts(
    winners: &[Option<(usize, u32)>],
    target_count: usize,
) -> Vec<(usize, usize, u32)> {
    // Per target: (best votes, number of claimants with that count).
    let mut best = vec![(0u32, 0usize); target_count];
    for &(target, votes) in winners.iter().flatten() {
        let entry = &mut best[target];
        if votes > entry.0 {
            *entry = (votes, 1);
        } else if votes == entry.0 {
            entry.1 += 1;
        }
    }

    winners
        .iter()
        .enumerate()
        .filter_map(|(reference, winner)| {
            let (target, votes) = (*winner)?;
            let (top, claimants) = best[target];
            (votes == top && claimants == 1).then_some((reference, target, votes))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(reference_count: usize, target_count: usize, entries: &[(usize, usize, u32)]) -> VoteMatrix {
        let mut m = VoteMatrix::new(reference_count, target_count);
        for &(target, reference, votes) in entries {
            for _ in 0..votes {
                m.increment(target, reference);
            }
        }
        m
    }

    #[test]
    fn test_top_vote_requires_min_votes() {
        let m = matrix(2, 2, &[(0, 0, 5), (1, 1, 2)]);
        let winners = m.top_vote_stars(3);
        assert_eq!(winners, vec![Some((0, 5)), None]);
    }

    #[test]
    fn test_tied_top_vote_excludes_star() {
        let m = matrix(1, 3, &[(0, 0, 4), (2, 0, 4), (1, 0, 1)]);
        assert_eq!(m.top_vote_stars(1), vec![None]);
    }

    #[test]
    fn test_lower_tie_does_not_exclude() {
        let m = matrix(1, 3, &[(0, 0, 2), (1, 0, 2), (2, 0, 7)]);
        assert_eq!(m.top_vote_stars(1), vec![Some((2, 7))]);
    }

    #[test]
    fn test_zero_votes_never_win() {
        let m = VoteMatrix::new(2, 2);
        assert_eq!(m.top_vote_stars(1), vec![None, None]);
    }

    #[test]
    fn test_merge_adds_counts() {
        let a = matrix(2, 2, &[(0, 1, 2)]);
        let b = matrix(2, 2, &[(0, 1, 3), (1, 0, 1)]);
        let m = a.merge(b);
        assert_eq!(m.get(0, 1), 5);
        assert_eq!(m.get(1, 0), 1);
        assert_eq!(m.get(0, 0), 0);
    }

    #[test]
    fn test_conflict_keeps_higher_votes() {
        let winners = [Some((0, 9)), Some((0, 4)), Some((1, 6))];
        assert_eq!(resolve_conflicts(&winners, 2), vec![(0, 0, 9), (2, 1, 6)]);
    }

    #[test]
    fn test_conflict_with_equal_votes_drops_both() {
        let winners = [Some((0, 5)), Some((0, 5)), None, Some((1, 3))];
        assert_eq!(resolve_conflicts(&winners, 2), vec![(3, 1, 3)]);
    }
}

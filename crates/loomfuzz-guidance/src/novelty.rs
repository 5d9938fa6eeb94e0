//! Coverage signatures and the novelty filter.
//!
//! A run's coverage map is summarized by bucketing each hit count into one
//! of eight power-of-two ranges. The filter compares that summary against
//! the maximum bucket ever recorded for each branch across saved inputs and
//! classifies the run as new-branch, new-bucket, or redundant.

use crate::coverage::CoverageMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classify a hit count into its bucket label.
/// Buckets: 1, 2, 3, 4-7, 8-15, 16-31, 32-127, 128+
pub fn bucket(count: u64) -> u8 {
    match count {
        0 => 0,
        1 => 1,
        2 => 2,
        3 => 3,
        4..=7 => 4,
        8..=15 => 8,
        16..=31 => 16,
        32..=127 => 32,
        _ => 128,
    }
}

/// Bucketed summary of one run's coverage map.
///
/// The signature is the set of (branch id, bucket) pairs for every branch
/// the run touched. Signatures are what the corpus stores per input and what
/// drives novelty and favorites.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSignature {
    buckets: BTreeMap<usize, u8>,
}

impl CoverageSignature {
    pub fn of(map: &CoverageMap) -> Self {
        let mut buckets = BTreeMap::new();
        for &idx in map.non_zero_indices() {
            buckets.insert(idx, bucket(map.value_at(idx)));
        }
        Self { buckets }
    }

    /// Branch ids covered by this signature.
    pub fn branches(&self) -> impl Iterator<Item = usize> + '_ {
        self.buckets.keys().copied()
    }

    pub fn bucket_for(&self, branch_id: usize) -> Option<u8> {
        self.buckets.get(&branch_id).copied()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Whether every (branch, bucket) pair of `self` is dominated by `other`
    /// (same branch present with an equal or higher bucket).
    pub fn is_subsumed_by(&self, other: &CoverageSignature) -> bool {
        self.buckets
            .iter()
            .all(|(b, k)| other.buckets.get(b).map(|ok| ok >= k).unwrap_or(false))
    }
}

/// Verdict of the novelty filter for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Novelty {
    /// Some branch was hit that no saved input has ever hit.
    NewBranch,
    /// Some branch's hit-count bucket exceeds the maximum ever saved.
    NewBucket,
    /// Nothing the saved inputs don't already show.
    Redundant,
}

/// Tracks, per branch, the highest bucket any saved input has reached.
///
/// The filter only learns from runs that were actually admitted (see
/// [`NoveltyFilter::absorb`]); rejected runs leave it untouched so a later
/// identical run is still judged against the saved frontier.
#[derive(Clone, Debug, Default)]
pub struct NoveltyFilter {
    max_bucket: BTreeMap<usize, u8>,
}

impl NoveltyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a run's coverage against the saved frontier.
    pub fn classify(&self, run: &CoverageMap) -> Novelty {
        let mut new_bucket = false;
        for &idx in run.non_zero_indices() {
            match self.max_bucket.get(&idx) {
                None => return Novelty::NewBranch,
                Some(&seen) => {
                    if bucket(run.value_at(idx)) > seen {
                        new_bucket = true;
                    }
                }
            }
        }
        if new_bucket {
            Novelty::NewBucket
        } else {
            Novelty::Redundant
        }
    }

    /// Record an admitted input's signature into the frontier.
    pub fn absorb(&mut self, signature: &CoverageSignature) {
        for branch in signature.branches() {
            let b = signature.bucket_for(branch).unwrap_or(0);
            let entry = self.max_bucket.entry(branch).or_insert(0);
            if b > *entry {
                *entry = b;
            }
        }
    }

    /// Number of branches any saved input has covered.
    pub fn covered_branches(&self) -> usize {
        self.max_bucket.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(hits: &[(usize, u64)]) -> CoverageMap {
        let mut map = CoverageMap::new();
        for &(idx, n) in hits {
            map.add(idx, n);
        }
        map
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(bucket(0), 0);
        assert_eq!(bucket(1), 1);
        assert_eq!(bucket(2), 2);
        assert_eq!(bucket(3), 3);
        assert_eq!(bucket(4), 4);
        assert_eq!(bucket(7), 4);
        assert_eq!(bucket(8), 8);
        assert_eq!(bucket(15), 8);
        assert_eq!(bucket(16), 16);
        assert_eq!(bucket(31), 16);
        assert_eq!(bucket(32), 32);
        assert_eq!(bucket(127), 32);
        assert_eq!(bucket(128), 128);
        assert_eq!(bucket(1_000_000), 128);
    }

    #[test]
    fn signature_collects_bucketed_pairs() {
        let map = map_with(&[(1, 1), (2, 9)]);
        let sig = CoverageSignature::of(&map);
        assert_eq!(sig.len(), 2);
        assert_eq!(sig.bucket_for(1), Some(1));
        assert_eq!(sig.bucket_for(2), Some(8));
        assert_eq!(sig.bucket_for(3), None);
    }

    #[test]
    fn subsumption_requires_equal_or_higher_buckets() {
        let small = CoverageSignature::of(&map_with(&[(1, 1)]));
        let big = CoverageSignature::of(&map_with(&[(1, 9), (2, 1)]));
        assert!(small.is_subsumed_by(&big));
        assert!(!big.is_subsumed_by(&small));
        assert!(small.is_subsumed_by(&small));
    }

    #[test]
    fn first_run_is_new_branch() {
        let filter = NoveltyFilter::new();
        let run = map_with(&[(5, 1)]);
        assert_eq!(filter.classify(&run), Novelty::NewBranch);
    }

    #[test]
    fn higher_bucket_on_known_branch_is_new_bucket() {
        let mut filter = NoveltyFilter::new();
        filter.absorb(&CoverageSignature::of(&map_with(&[(5, 1)])));

        let same = map_with(&[(5, 1)]);
        assert_eq!(filter.classify(&same), Novelty::Redundant);

        let hotter = map_with(&[(5, 40)]);
        assert_eq!(filter.classify(&hotter), Novelty::NewBucket);
    }

    #[test]
    fn lower_bucket_is_redundant() {
        let mut filter = NoveltyFilter::new();
        filter.absorb(&CoverageSignature::of(&map_with(&[(5, 40)])));
        let cooler = map_with(&[(5, 2)]);
        assert_eq!(filter.classify(&cooler), Novelty::Redundant);
    }

    #[test]
    fn new_branch_wins_over_new_bucket() {
        let mut filter = NoveltyFilter::new();
        filter.absorb(&CoverageSignature::of(&map_with(&[(5, 1)])));
        // Branch 9 is unseen; even though branch 5 also has a higher bucket,
        // the verdict is the stronger NewBranch.
        let run = map_with(&[(5, 40), (9, 1)]);
        assert_eq!(filter.classify(&run), Novelty::NewBranch);
    }

    #[test]
    fn rejected_runs_do_not_move_the_frontier() {
        let mut filter = NoveltyFilter::new();
        filter.absorb(&CoverageSignature::of(&map_with(&[(5, 1)])));
        let hotter = map_with(&[(5, 40)]);
        assert_eq!(filter.classify(&hotter), Novelty::NewBucket);
        // Not absorbed: the same run classifies identically again.
        assert_eq!(filter.classify(&hotter), Novelty::NewBucket);
        assert_eq!(filter.covered_branches(), 1);
    }

    #[test]
    fn empty_run_is_redundant() {
        let filter = NoveltyFilter::new();
        assert_eq!(filter.classify(&CoverageMap::new()), Novelty::Redundant);
    }
}

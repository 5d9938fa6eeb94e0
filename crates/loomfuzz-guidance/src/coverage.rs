//! Branch coverage counters.
//!
//! A [`CoverageMap`] is a fixed array of hit counters indexed by branch id,
//! with a side list of the non-zero cells so that enumeration and clearing
//! cost O(k) in the number of branches actually touched rather than O(M) in
//! the map capacity.

pub use loomfuzz_trace::COVERAGE_MAP_SIZE;

/// Fixed-capacity branch hit counters with cached non-zero cells.
#[derive(Clone, Debug)]
pub struct CoverageMap {
    counts: Vec<u64>,
    /// Indices with a non-zero count, in first-touch order.
    nonzero: Vec<usize>,
}

impl CoverageMap {
    pub fn new() -> Self {
        Self {
            counts: vec![0; COVERAGE_MAP_SIZE],
            nonzero: Vec::new(),
        }
    }

    /// Increment the counter for a branch id, returning the new count.
    pub fn increment(&mut self, branch_id: usize) -> u64 {
        let idx = branch_id % COVERAGE_MAP_SIZE;
        if self.counts[idx] == 0 {
            self.nonzero.push(idx);
        }
        self.counts[idx] += 1;
        self.counts[idx]
    }

    /// Add `amount` hits to a branch id.
    pub fn add(&mut self, branch_id: usize, amount: u64) {
        if amount == 0 {
            return;
        }
        let idx = branch_id % COVERAGE_MAP_SIZE;
        if self.counts[idx] == 0 {
            self.nonzero.push(idx);
        }
        self.counts[idx] += amount;
    }

    /// Current count for a branch id.
    pub fn value_at(&self, branch_id: usize) -> u64 {
        self.counts[branch_id % COVERAGE_MAP_SIZE]
    }

    /// Indices of non-zero cells, in first-touch order.
    pub fn non_zero_indices(&self) -> &[usize] {
        &self.nonzero
    }

    /// Counts of non-zero cells, in first-touch order.
    pub fn non_zero_values(&self) -> impl Iterator<Item = u64> + '_ {
        self.nonzero.iter().map(|&i| self.counts[i])
    }

    /// Number of covered branches.
    pub fn non_zero_count(&self) -> usize {
        self.nonzero.len()
    }

    /// Total hits across all branches.
    pub fn total_hits(&self) -> u64 {
        self.nonzero.iter().map(|&i| self.counts[i]).sum()
    }

    /// Fold this map's counts into `cumulative`, cell-wise addition.
    ///
    /// Cumulative cells only ever grow, which is what keeps cumulative
    /// coverage monotonic across trials.
    pub fn fold_into(&self, cumulative: &mut CoverageMap) {
        for &idx in &self.nonzero {
            cumulative.add(idx, self.counts[idx]);
        }
    }

    /// Reset all counters. O(k) in cells touched since the last clear.
    pub fn clear(&mut self) {
        for idx in self.nonzero.drain(..) {
            self.counts[idx] = 0;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nonzero.is_empty()
    }
}

impl Default for CoverageMap {
    fn default() -> Self {
        Self::new()
    }
}

//! Behavioral diversity metrics over the cumulative branch-hit histogram.
//!
//! The diversity of a fuzzing campaign is summarized by Hill numbers of
//! orders 0, 1 and 2 computed from the relative hit frequencies p_i of the
//! covered branches: H0 is the number of covered branches, H1 is
//! exp(Shannon entropy), H2 is the inverse Simpson index. Recomputation is
//! throttled to a refresh interval since it walks every covered branch.

use crate::coverage::CoverageMap;
use std::time::{Duration, Instant};

/// Default interval between metric recomputations.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Cached Hill numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HillNumbers {
    pub h0: f64,
    pub h1: f64,
    pub h2: f64,
}

/// Accumulates, per branch, the number of valid executions that covered it,
/// and computes Hill numbers on demand.
pub struct DiversityCounter {
    hits: CoverageMap,
    total_branch_hits: u64,
    executions: u64,
    cached: HillNumbers,
    last_refresh: Option<Instant>,
    refresh_interval: Duration,
}

impl DiversityCounter {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            hits: CoverageMap::new(),
            total_branch_hits: 0,
            executions: 0,
            cached: HillNumbers::default(),
            last_refresh: None,
            refresh_interval,
        }
    }

    /// Fold one valid execution's coverage into the histogram.
    ///
    /// Each covered branch counts once per execution, however many times it
    /// fired inside the run. A loop body hit a thousand times in one trial
    /// is one behavior, not a thousand.
    pub fn record(&mut self, run: &CoverageMap) {
        for &idx in run.non_zero_indices() {
            self.hits.increment(idx);
        }
        self.total_branch_hits += run.non_zero_count() as u64;
        self.executions += 1;
    }

    /// Cached metrics, recomputed at most once per refresh interval.
    pub fn cached_metrics(&mut self, now: Instant) -> HillNumbers {
        let due = match self.last_refresh {
            None => true,
            Some(at) => now.duration_since(at) >= self.refresh_interval,
        };
        if due {
            self.cached = self.compute();
            self.last_refresh = Some(now);
        }
        self.cached
    }

    /// Recompute all three Hill numbers from the current histogram.
    pub fn compute(&self) -> HillNumbers {
        if self.total_branch_hits == 0 {
            return HillNumbers::default();
        }
        let total = self.total_branch_hits as f64;
        let mut shannon = 0.0;
        let mut h0 = 0.0;
        let mut simpson = 0.0;
        for count in self.hits.non_zero_values() {
            let p = count as f64 / total;
            shannon += p * p.ln();
            h0 += 1.0;
            simpson += p * p;
        }
        HillNumbers {
            h0,
            h1: (-shannon).exp(),
            h2: 1.0 / simpson,
        }
    }

    /// Shannon entropy of the current histogram.
    pub fn shannon_index(&self) -> f64 {
        if self.total_branch_hits == 0 {
            return 0.0;
        }
        let total = self.total_branch_hits as f64;
        -self
            .hits
            .non_zero_values()
            .map(|c| {
                let p = c as f64 / total;
                p * p.ln()
            })
            .sum::<f64>()
    }

    /// Hill number of arbitrary order q != 1.
    pub fn hill_number(&self, order: i32) -> f64 {
        if order == 1 {
            return self.shannon_index().exp();
        }
        if self.total_branch_hits == 0 {
            return 0.0;
        }
        let total = self.total_branch_hits as f64;
        let sum: f64 = self
            .hits
            .non_zero_values()
            .map(|c| (c as f64 / total).powi(order))
            .sum();
        sum.powf(1.0 / (1.0 - order as f64))
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    /// The cumulative per-branch hit histogram.
    pub fn histogram(&self) -> &CoverageMap {
        &self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    /// Build a counter by recording one run per entry; each run's branches
    /// carry the given in-run hit counts.
    fn counter_of(runs: &[&[(usize, u64)]]) -> DiversityCounter {
        let mut counter = DiversityCounter::new(DEFAULT_REFRESH_INTERVAL);
        for hits in runs {
            let mut run = CoverageMap::new();
            for &(idx, n) in *hits {
                run.add(idx, n);
            }
            counter.record(&run);
        }
        counter
    }

    #[test]
    fn empty_histogram_is_all_zero() {
        let counter = DiversityCounter::new(DEFAULT_REFRESH_INTERVAL);
        let m = counter.compute();
        assert_eq!(m.h0, 0.0);
        assert_eq!(m.h1, 0.0);
        assert_eq!(m.h2, 0.0);
    }

    #[test]
    fn uniform_histogram_has_equal_hill_numbers() {
        // Three runs each covering the same three branches yield the
        // histogram [3, 3, 3]: perfectly even, so H0 = H1 = H2 = 3.
        let run: &[(usize, u64)] = &[(1, 1), (2, 1), (3, 1)];
        let counter = counter_of(&[run, run, run]);
        let m = counter.compute();
        assert!((m.h0 - 3.0).abs() < EPS);
        assert!((m.h1 - 3.0).abs() < EPS);
        assert!((m.h2 - 3.0).abs() < EPS);
    }

    #[test]
    fn skewed_histogram_orders_h0_h1_h2() {
        // Branch 1 covered by six runs, branch 2 by two, branch 3 by one:
        // uneven occupancy satisfies H0 > H1 > H2.
        let mut runs: Vec<&[(usize, u64)]> = vec![&[(1, 1)]; 6];
        runs.push(&[(2, 1)]);
        runs.push(&[(2, 1)]);
        runs.push(&[(3, 1)]);
        let counter = counter_of(&runs);
        let m = counter.compute();
        assert!((m.h0 - 3.0).abs() < EPS);
        assert!(m.h0 > m.h1);
        assert!(m.h1 > m.h2);
    }

    #[test]
    fn in_run_hit_magnitude_does_not_skew_diversity() {
        // One trial hammers branch 1 a hundred times; another covers
        // branch 2 once. Two distinct behaviors, weighted equally: the
        // loop-heavy trial must not swamp the distribution.
        let counter = counter_of(&[&[(1, 100)], &[(2, 1)]]);
        assert_eq!(counter.histogram().value_at(1), 1);
        assert_eq!(counter.histogram().value_at(2), 1);
        let m = counter.compute();
        assert!((m.h0 - 2.0).abs() < EPS);
        assert!((m.h1 - 2.0).abs() < EPS);
        assert!((m.h2 - 2.0).abs() < EPS);
    }

    #[test]
    fn h0_equals_covered_branch_count() {
        let counter = counter_of(&[&[(10, 5), (20, 1), (30, 7), (40, 2)]]);
        let m = counter.compute();
        assert_eq!(m.h0 as usize, counter.histogram().non_zero_count());
    }

    #[test]
    fn hill_number_generic_matches_closed_forms() {
        let run: &[(usize, u64)] = &[(1, 1), (2, 1), (3, 1)];
        let counter = counter_of(&[run, run, run]);
        let m = counter.compute();
        assert!((counter.hill_number(1) - m.h1).abs() < EPS);
        assert!((counter.hill_number(2) - m.h2).abs() < EPS);
    }

    #[test]
    fn record_counts_each_branch_once_per_execution() {
        let mut run = CoverageMap::new();
        run.add(1, 2);
        let mut counter = DiversityCounter::new(DEFAULT_REFRESH_INTERVAL);
        counter.record(&run);
        counter.record(&run);
        assert_eq!(counter.executions(), 2);
        assert_eq!(counter.histogram().value_at(1), 2);
    }

    #[test]
    fn cache_holds_between_refreshes() {
        let mut counter = counter_of(&[&[(1, 1)]]);
        let t0 = Instant::now();
        let first = counter.cached_metrics(t0);
        assert!((first.h0 - 1.0).abs() < EPS);

        // More data arrives, but within the refresh window the cached
        // values are returned unchanged.
        let mut run = CoverageMap::new();
        run.add(2, 1);
        counter.record(&run);
        let within = counter.cached_metrics(t0 + Duration::from_millis(100));
        assert_eq!(within, first);

        let after = counter.cached_metrics(t0 + DEFAULT_REFRESH_INTERVAL);
        assert!((after.h0 - 2.0).abs() < EPS);
    }
}

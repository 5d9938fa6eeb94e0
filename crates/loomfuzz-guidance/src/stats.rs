//! Campaign counters and the periodic stats line.

use crate::config::StatsStyle;
use std::time::{Duration, Instant};

/// Live counters for the running campaign.
#[derive(Debug)]
pub struct CampaignStats {
    start: Instant,
    pub total_execs: u64,
    pub valid_execs: u64,
    pub invalid_execs: u64,
    /// Every failing trial, including duplicates of a known fingerprint.
    pub failed_execs: u64,
    last_line_at: Option<Instant>,
    execs_at_last_line: u64,
}

impl CampaignStats {
    pub fn new(start: Instant) -> Self {
        Self {
            start,
            total_execs: 0,
            valid_execs: 0,
            invalid_execs: 0,
            failed_execs: 0,
            last_line_at: None,
            execs_at_last_line: 0,
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.duration_since(self.start)
    }

    /// If a stats line is due, close the current measurement window and
    /// return the window's executions per second.
    pub fn take_line(&mut self, now: Instant, interval: Duration) -> Option<f64> {
        let window_start = match self.last_line_at {
            None => self.start,
            Some(at) if now.duration_since(at) >= interval => at,
            Some(_) => return None,
        };
        let window_execs = self.total_execs - self.execs_at_last_line;
        let secs = now.duration_since(window_start).as_secs_f64().max(1e-3);
        self.last_line_at = Some(now);
        self.execs_at_last_line = self.total_execs;
        Some(window_execs as f64 / secs)
    }
}

/// Everything one stats line reports.
#[derive(Clone, Copy, Debug)]
pub struct StatsSnapshot {
    pub elapsed: Duration,
    pub total_execs: u64,
    pub valid_execs: u64,
    pub corpus_size: usize,
    pub covered_branches: usize,
    pub unique_failures: usize,
    pub execs_per_sec: f64,
    pub h1: f64,
    pub h2: f64,
}

/// Render one progress line in the configured style.
pub fn format_stats_line(style: StatsStyle, snap: &StatsSnapshot) -> String {
    match style {
        StatsStyle::Afl => {
            let valid_pct = if snap.total_execs > 0 {
                100.0 * snap.valid_execs as f64 / snap.total_execs as f64
            } else {
                0.0
            };
            format!(
                "Elapsed: {}s | Execs: {} ({:.0}/s) | Valid: {} ({:.1}%) | Corpus: {} | Branches: {} | Failures: {} | H1: {:.2} | H2: {:.2}",
                snap.elapsed.as_secs(),
                snap.total_execs,
                snap.execs_per_sec,
                snap.valid_execs,
                valid_pct,
                snap.corpus_size,
                snap.covered_branches,
                snap.unique_failures,
                snap.h1,
                snap.h2,
            )
        }
        StatsStyle::LibFuzzer => format!(
            "#{} cov: {} corp: {} exec/s: {:.0} valid: {} failures: {}",
            snap.total_execs,
            snap.covered_branches,
            snap.corpus_size,
            snap.execs_per_sec,
            snap.valid_execs,
            snap.unique_failures,
        ),
    }
}

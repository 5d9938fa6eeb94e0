//! The guidance engine: trial scheduling, coverage feedback, admission, and
//! failure persistence, behind the contract the test harness drives.
//!
//! The harness loop is:
//!
//! ```text
//! while guidance.has_input() {
//!     let stream = guidance.get_input()?;
//!     let outcome = run target with generators reading `stream`,
//!                   feeding trace events to guidance.trace_callback();
//!     guidance.handle_result(outcome, error)?;
//! }
//! ```
//!
//! `get_input` opens the choice stream for the scheduled input and
//! `handle_result` closes it, so resources acquired by a trial are released
//! on every exit path of the loop. The engine itself is single-threaded;
//! the only cross-thread touchpoint is the per-trial coverage map behind a
//! mutex, which target threads reach through their trace callbacks.

use crate::choice::{ChoiceSource, LinearSource, SplitSource};
use crate::config::{Config, ConfigError, Engine};
use crate::corpus::{Corpus, InputBytes, SavedInput};
use crate::coverage::CoverageMap;
use crate::diversity::{DiversityCounter, HillNumbers, DEFAULT_REFRESH_INTERVAL};
use crate::failures::{FailureInfo, FailureRegistry};
use crate::mutator::MutationConfig;
use crate::novelty::{CoverageSignature, Novelty, NoveltyFilter};
use crate::output::{load_seed_inputs, OutputDir, OutputError};
use crate::scheduler::{ScheduledInput, Scheduler};
use crate::stats::{format_stats_line, CampaignStats, StatsSnapshot};
use log::{debug, info, warn};
use loomfuzz_trace::TraceEvent;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;

/// Fatal errors of the guidance engine. Everything else (failing targets,
/// invalid inputs, timeouts) is absorbed by the loop.
#[derive(Debug, Error)]
pub enum GuidanceError {
    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("guidance protocol violation: {0}")]
    Protocol(&'static str),
}

/// Classification of one finished trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialOutcome {
    /// The target ran to completion (or threw an expected error).
    Success,
    /// An assumption was violated; the input is counted but never saved.
    Invalid,
    /// The target failed unexpectedly.
    Failure,
}

/// Per-thread consumer of trace events.
pub type TraceCallback = Box<dyn FnMut(TraceEvent) + Send>;

/// The contract between the guidance engine and the external test harness.
pub trait Guidance {
    /// Whether another trial is scheduled. Once false, fuzzing is over.
    fn has_input(&mut self) -> bool;

    /// Open the choice stream for the next trial. Invoked at most once per
    /// successful `has_input`.
    fn get_input(&mut self) -> Result<TrialInput, GuidanceError>;

    /// Optional hook: the harness reports the resolved generator arguments.
    fn observe_generated(&mut self, _args: &[String]) {}

    /// Close the current trial. Invoked exactly once per `get_input`.
    fn handle_result(
        &mut self,
        outcome: TrialOutcome,
        error: Option<&FailureInfo>,
    ) -> Result<(), GuidanceError>;

    /// A fresh trace consumer; the harness calls this once per target
    /// thread. Only branch events influence coverage.
    fn trace_callback(&mut self) -> TraceCallback;
}

/// The live choice source of the current trial.
enum ActiveSource {
    Linear(LinearSource),
    Split(SplitSource),
}

impl ActiveSource {
    fn placeholder() -> Self {
        ActiveSource::Linear(LinearSource::new(Vec::new(), true, ChaCha8Rng::seed_from_u64(0)))
    }

    fn into_input_bytes(self) -> InputBytes {
        match self {
            ActiveSource::Linear(src) => InputBytes::Linear(src.into_bytes()),
            ActiveSource::Split(src) => InputBytes::Split(src.into_record()),
        }
    }
}

impl ChoiceSource for ActiveSource {
    fn read_byte(&mut self) -> Option<u8> {
        match self {
            ActiveSource::Linear(src) => src.read_byte(),
            ActiveSource::Split(src) => src.read_byte(),
        }
    }

    fn read_structure_byte(&mut self) -> Option<u8> {
        match self {
            ActiveSource::Linear(src) => src.read_structure_byte(),
            ActiveSource::Split(src) => src.read_structure_byte(),
        }
    }

    fn read_value_byte(&mut self) -> Option<u8> {
        match self {
            ActiveSource::Linear(src) => src.read_value_byte(),
            ActiveSource::Split(src) => src.read_value_byte(),
        }
    }
}

/// Harness-side handle to the current trial's choice stream.
///
/// Clones share the same underlying source; generators on target threads
/// may read concurrently, serialized by the internal mutex.
#[derive(Clone)]
pub struct TrialInput {
    inner: Arc<Mutex<ActiveSource>>,
}

impl ChoiceSource for TrialInput {
    fn read_byte(&mut self) -> Option<u8> {
        self.inner.lock().ok()?.read_byte()
    }

    fn read_structure_byte(&mut self) -> Option<u8> {
        self.inner.lock().ok()?.read_structure_byte()
    }

    fn read_value_byte(&mut self) -> Option<u8> {
        self.inner.lock().ok()?.read_value_byte()
    }
}

struct ActiveTrial {
    scheduled: ScheduledInput,
    source: Arc<Mutex<ActiveSource>>,
    started: Instant,
}

/// End-of-session totals, also written to `session.json`.
#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub total_execs: u64,
    pub valid_execs: u64,
    pub invalid_execs: u64,
    pub failed_execs: u64,
    pub unique_failures: usize,
    pub corpus_size: usize,
    pub covered_branches: usize,
    pub h0: f64,
    pub h1: f64,
    pub h2: f64,
    pub elapsed_secs: u64,
}

/// The coverage-guided guidance engine.
pub struct FuzzGuidance {
    config: Config,
    rng: ChaCha8Rng,
    scheduler: Scheduler,
    corpus: Corpus,
    novelty: NoveltyFilter,
    diversity: DiversityCounter,
    cumulative: CoverageMap,
    run_coverage: Arc<Mutex<CoverageMap>>,
    failures: FailureRegistry,
    output: OutputDir,
    stats: CampaignStats,
    current: Option<ActiveTrial>,
    stop_requested: bool,
    start: Instant,
    /// H1 after the last successful fold; baseline for diversity-gain
    /// admission.
    last_h1: f64,
    last_generated: Vec<String>,
}

impl FuzzGuidance {
    pub fn new(config: Config) -> Result<Self, GuidanceError> {
        config.validate()?;

        let seed = match config.random_seed {
            Some(seed) => seed,
            None => ChaCha8Rng::from_entropy().next_u64(),
        };
        let seeds = match &config.input_dir {
            Some(dir) => load_seed_inputs(dir, config.engine.is_split())?,
            None => Vec::new(),
        };
        info!(
            "loomfuzz starting: engine={} seed={} seeds={} out={}",
            config.engine,
            seed,
            seeds.len(),
            config.output_dir.display()
        );
        if !config.excludes.is_empty() || !config.includes.is_empty() {
            info!(
                "instrumentation filters forwarded: excludes={:?} includes={:?}",
                config.excludes, config.includes
            );
        }

        let output = OutputDir::create(&config.output_dir)?;
        let mutation = MutationConfig {
            structure_weight: config.structure_weight,
            ..MutationConfig::default()
        };
        let scheduler = Scheduler::new(
            seed,
            seeds,
            config.engine,
            mutation,
            config.fixed_size,
            config.blind,
        );
        let start = Instant::now();

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            scheduler,
            corpus: Corpus::new(config.p_random_parent),
            novelty: NoveltyFilter::new(),
            diversity: DiversityCounter::new(DEFAULT_REFRESH_INTERVAL),
            cumulative: CoverageMap::new(),
            run_coverage: Arc::new(Mutex::new(CoverageMap::new())),
            failures: FailureRegistry::new(),
            output,
            stats: CampaignStats::new(start),
            current: None,
            stop_requested: false,
            start,
            last_h1: 0.0,
            last_generated: Vec::new(),
            config,
        })
    }

    /// Request termination after the current trial. Idempotent.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn failure_registry(&self) -> &FailureRegistry {
        &self.failures
    }

    pub fn cumulative_coverage(&self) -> &CoverageMap {
        &self.cumulative
    }

    pub fn total_execs(&self) -> u64 {
        self.stats.total_execs
    }

    /// Flush final state and summarize the session.
    pub fn finish(&mut self) -> Result<SessionSummary, GuidanceError> {
        let _ = self.append_plot_row();
        if self.config.save_branch_hit_counts {
            self.output.write_branch_hit_counts(&self.cumulative)?;
        }
        let hill = self.diversity.compute();
        let summary = SessionSummary {
            total_execs: self.stats.total_execs,
            valid_execs: self.stats.valid_execs,
            invalid_execs: self.stats.invalid_execs,
            failed_execs: self.stats.failed_execs,
            unique_failures: self.failures.len(),
            corpus_size: self.corpus.len(),
            covered_branches: self.cumulative.non_zero_count(),
            h0: hill.h0,
            h1: hill.h1,
            h2: hill.h2,
            elapsed_secs: self.start.elapsed().as_secs(),
        };
        self.output.write_session_summary(&summary)?;
        self.output.log_line(
            self.start.elapsed().as_millis(),
            &format!(
                "session finished: {} execs, {} corpus, {} unique failures",
                summary.total_execs, summary.corpus_size, summary.unique_failures
            ),
        )?;
        Ok(summary)
    }

    /// Where failing inputs are written; named in the final report.
    pub fn failures_dir(&self) -> std::path::PathBuf {
        self.output.failures_dir().to_path_buf()
    }

    fn deadline_reached(&self) -> bool {
        match self.config.duration {
            Some(limit) => self.start.elapsed() >= limit,
            None => false,
        }
    }

    fn trial_cap_reached(&self) -> bool {
        match self.config.trials {
            Some(cap) => self.stats.total_execs >= cap,
            None => false,
        }
    }

    fn on_success(&mut self, trial: &ActiveTrial, bytes: InputBytes, elapsed_ns: u64) {
        self.stats.valid_execs += 1;
        if self.config.no_cov {
            return;
        }

        // Snapshot the per-trial map before any bookkeeping so end-of-trial
        // observation is consistent even if target threads linger.
        let run = match self.run_coverage.lock() {
            Ok(map) => map.clone(),
            Err(_) => return,
        };

        run.fold_into(&mut self.cumulative);
        self.diversity.record(&run);

        if self.config.blind {
            return;
        }

        let verdict = self.novelty.classify(&run);
        let diversity_gain = if self.config.admit_on_diversity_gain
            && self.config.engine == Engine::Bedivfuzz
        {
            let h1 = self.diversity.compute().h1;
            let gained = h1 - self.last_h1 >= self.config.diversity_epsilon;
            self.last_h1 = h1;
            gained
        } else {
            false
        };

        let admit = verdict != Novelty::Redundant || diversity_gain || self.config.save_all;
        if !admit {
            return;
        }

        let signature = CoverageSignature::of(&run);
        let input = SavedInput {
            id: 0,
            parent_id: trial.scheduled.parent_id,
            reason: trial.scheduled.reason,
            bytes,
            signature: signature.clone(),
            favored_branches: BTreeSet::new(),
            execution_time_ns: elapsed_ns,
            mutation_count: 0,
        };
        let id = self.corpus.admit(input);
        self.novelty.absorb(&signature);

        if let Some(saved) = self.corpus.get(id) {
            let size = saved.bytes.len();
            if let Err(e) = self.output.save_corpus_input(saved) {
                warn!("failed to persist corpus input {}: {}", id, e);
            }
            info!(
                "admitted input {} ({:?}, {} branches, {} bytes)",
                id,
                verdict,
                signature.len(),
                size
            );
        }
        let _ = self.output.log_line(
            self.start.elapsed().as_millis(),
            &format!("admit id={} verdict={:?} branches={}", id, verdict, signature.len()),
        );
        let _ = self.append_plot_row();
    }

    fn on_failure(&mut self, bytes: InputBytes, info: &FailureInfo) {
        self.stats.failed_execs += 1;
        let fingerprint = info.fingerprint();
        let failure_id = self.failures.len() as u64;
        if self.failures.try_register(fingerprint, failure_id) {
            warn!(
                "new failure {}: {} at {}",
                fingerprint, info.class, info.frame
            );
            if let Err(e) = self.output.save_failure(failure_id, &bytes, info) {
                warn!("failed to persist failure {}: {}", failure_id, e);
            }
            let _ = self.output.log_line(
                self.start.elapsed().as_millis(),
                &format!(
                    "failure id={} fingerprint={} class={}",
                    failure_id, fingerprint, info.class
                ),
            );
        } else {
            debug!("duplicate failure {} ({})", fingerprint, info.class);
        }
        if self.config.exit_on_crash {
            self.stop_requested = true;
        }
    }

    fn append_plot_row(&mut self) -> Result<(), OutputError> {
        let hill = self.diversity.cached_metrics(Instant::now());
        self.output.append_plot_row(
            self.start.elapsed().as_millis() as u64,
            self.stats.total_execs,
            self.stats.valid_execs,
            self.corpus.len(),
            self.cumulative.non_zero_count(),
            hill.h1,
            hill.h2,
        )
    }

    fn maybe_emit_stats(&mut self) {
        let now = Instant::now();
        let Some(rate) = self.stats.take_line(now, self.config.stats_refresh) else {
            return;
        };
        let HillNumbers { h1, h2, .. } = self.diversity.cached_metrics(now);
        let snapshot = StatsSnapshot {
            elapsed: self.stats.elapsed(now),
            total_execs: self.stats.total_execs,
            valid_execs: self.stats.valid_execs,
            corpus_size: self.corpus.len(),
            covered_branches: self.cumulative.non_zero_count(),
            unique_failures: self.failures.len(),
            execs_per_sec: rate,
            h1,
            h2,
        };
        let line = format_stats_line(self.config.stats_style, &snapshot);
        info!("{}", line);
        let _ = self
            .output
            .log_line(self.start.elapsed().as_millis(), &line);
    }
}

impl Guidance for FuzzGuidance {
    fn has_input(&mut self) -> bool {
        !(self.stop_requested || self.deadline_reached() || self.trial_cap_reached())
    }

    fn get_input(&mut self) -> Result<TrialInput, GuidanceError> {
        if self.current.is_some() {
            return Err(GuidanceError::Protocol(
                "get_input called again before handle_result",
            ));
        }
        let scheduled = self.scheduler.next(&mut self.corpus, &mut self.rng);

        // Extension randomness comes from the master stream, so growth is
        // reproducible under a fixed seed.
        let extension_rng = ChaCha8Rng::seed_from_u64(self.rng.next_u64());
        let source = match scheduled.bytes.clone() {
            InputBytes::Linear(bytes) => ActiveSource::Linear(LinearSource::new(
                bytes,
                self.config.fixed_size,
                extension_rng,
            )),
            InputBytes::Split(record) => ActiveSource::Split(SplitSource::new(
                record.structure,
                record.value,
                self.config.fixed_size,
                extension_rng,
            )),
        };

        if let Ok(mut map) = self.run_coverage.lock() {
            map.clear();
        }

        let source = Arc::new(Mutex::new(source));
        self.current = Some(ActiveTrial {
            scheduled,
            source: source.clone(),
            started: Instant::now(),
        });
        Ok(TrialInput { inner: source })
    }

    fn observe_generated(&mut self, args: &[String]) {
        self.last_generated = args.to_vec();
        debug!("generated arguments: {:?}", self.last_generated);
    }

    fn handle_result(
        &mut self,
        outcome: TrialOutcome,
        error: Option<&FailureInfo>,
    ) -> Result<(), GuidanceError> {
        let trial = self
            .current
            .take()
            .ok_or(GuidanceError::Protocol("handle_result without get_input"))?;

        let elapsed = trial.started.elapsed();
        self.stats.total_execs += 1;

        // Reclaim the concrete bytes the generators consumed (including
        // stream extension and, for split inputs, the re-recorded access
        // log).
        let bytes = {
            let mut guard = trial
                .source
                .lock()
                .map_err(|_| GuidanceError::Protocol("trial source mutex poisoned"))?;
            std::mem::replace(&mut *guard, ActiveSource::placeholder())
        }
        .into_input_bytes();

        let timed_out = self
            .config
            .run_timeout
            .map(|limit| elapsed > limit)
            .unwrap_or(false);

        if timed_out {
            let info = FailureInfo::timeout(self.config.run_timeout.unwrap_or_default());
            self.on_failure(bytes, &info);
        } else {
            match outcome {
                TrialOutcome::Success => {
                    self.on_success(&trial, bytes, elapsed.as_nanos() as u64)
                }
                TrialOutcome::Invalid => {
                    self.stats.invalid_execs += 1;
                }
                TrialOutcome::Failure => {
                    let owned;
                    let info = match error {
                        Some(info) => info,
                        None => {
                            owned = FailureInfo {
                                class: "UnknownFailure".to_string(),
                                frame: String::new(),
                                message: "harness reported failure without detail".to_string(),
                                stacktrace: String::new(),
                            };
                            &owned
                        }
                    };
                    self.on_failure(bytes, info);
                }
            }
        }

        self.maybe_emit_stats();
        Ok(())
    }

    fn trace_callback(&mut self) -> TraceCallback {
        if self.config.no_cov {
            return Box::new(|_| {});
        }
        let map = Arc::clone(&self.run_coverage);
        Box::new(move |event| {
            if let Some(idx) = event.branch_index() {
                if let Ok(mut map) = map.lock() {
                    map.increment(idx);
                }
            }
        })
    }
}

//! Coverage-guided, generator-based fuzzing engine.
//!
//! loomfuzz evolves a pool of choice-sequence inputs toward branch coverage
//! and, in the behavioral-diversity engine, toward statistically diverse
//! branch-hit distributions:
//!
//! ```text
//! 1. The scheduler picks a saved input (or replays a seed, or goes random)
//! 2. The mutation engine derives a child byte sequence
//! 3. The harness runs the target; generators read the choice stream
//! 4. Instrumentation feeds branch hits into the per-trial coverage map
//! 5. The novelty filter decides whether the child joins the corpus
//! 6. Diversity metrics, favorites, and the failure registry are updated
//! ```
//!
//! # Module Structure
//!
//! - [`choice`] — linear and split (structure/value) choice streams
//! - [`coverage`] — fixed-size branch counters with non-zero caching
//! - [`novelty`] — hit-count buckets, signatures, admission verdicts
//! - [`diversity`] — Hill numbers over the cumulative hit histogram
//! - [`corpus`] — saved inputs and the favorites cover-set
//! - [`mutator`] — linear/split mutation policies
//! - [`scheduler`] — seed replay and the exploitation state machine
//! - [`guidance`] — the engine behind the harness-facing contract
//! - [`session`] — the trial loop driving a test harness
//! - [`failures`] — failure fingerprints and deduplication
//! - [`output`] — output directory, seed loading, snapshots
//! - [`stats`] / [`report`] — progress lines and the final report
//! - [`config`] — campaign configuration and validation
//!
//! # Determinism
//!
//! All randomness flows from a single master seed through ChaCha8 streams;
//! iterated collections are ordered. Two campaigns with the same seed, seeds
//! directory, and target produce the same input bytes in the same order.

pub mod choice;
pub mod config;
pub mod corpus;
pub mod coverage;
pub mod diversity;
pub mod failures;
pub mod guidance;
pub mod mutator;
pub mod novelty;
pub mod output;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod stats;

pub use choice::{ChoiceSource, LinearSource, SplitRecord, SplitSource, StreamKind};
pub use config::{Config, ConfigError, Engine, Instrumentation, StatsStyle};
pub use corpus::{Corpus, CreationReason, InputBytes, SavedInput};
pub use coverage::{CoverageMap, COVERAGE_MAP_SIZE};
pub use diversity::{DiversityCounter, HillNumbers};
pub use failures::{FailureInfo, FailureRegistry, Fingerprint};
pub use guidance::{
    FuzzGuidance, Guidance, GuidanceError, SessionSummary, TraceCallback, TrialInput, TrialOutcome,
};
pub use mutator::{mutation_budget, MutationConfig, Mutator};
pub use novelty::{bucket, CoverageSignature, Novelty, NoveltyFilter};
pub use scheduler::{Phase, ScheduledInput, Scheduler};
pub use session::{run_session, HarnessOutcome, TestHarness};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_types_are_exported() {
        let _ = CoverageMap::new();
        let _ = NoveltyFilter::new();
        let _ = Corpus::new(corpus::DEFAULT_P_RANDOM);
        let _ = Mutator::new(42);
        let _ = Config::default();
    }
}

//! Trial scheduling: seed replay, parent selection, and the mix of
//! exploitation vs. fresh random inputs.
//!
//! The scheduler walks a two-phase state machine. `Seeding` replays each
//! user-supplied seed file exactly once; `Exploiting` selects corpus
//! parents, derives a budgeted batch of mutated children per parent, and
//! periodically interleaves a parentless random input. In blind mode every
//! scheduled input is random.

use crate::choice::SplitRecord;
use crate::config::Engine;
use crate::corpus::{Corpus, CreationReason, InputBytes};
use crate::mutator::{mutation_budget, MutationConfig, Mutator};
use rand::RngCore;
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

/// Base of the random-input cadence: a fresh input every
/// `RANDOM_TRIAL_BASE + corpus size` trials.
const RANDOM_TRIAL_BASE: u64 = 10;

/// Stream length of parentless inputs when stream extension is disabled.
const FIXED_RANDOM_INPUT_SIZE: usize = 256;

/// Scheduler phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Seeding,
    Exploiting,
}

/// One input the scheduler decided to run next.
#[derive(Clone, Debug)]
pub struct ScheduledInput {
    pub bytes: InputBytes,
    pub parent_id: Option<u64>,
    pub reason: CreationReason,
}

pub struct Scheduler {
    phase: Phase,
    seeds: VecDeque<InputBytes>,
    pending_children: VecDeque<(InputBytes, u64)>,
    mutator: Mutator,
    mutation: MutationConfig,
    engine: Engine,
    fixed_size: bool,
    blind: bool,
    trials_emitted: u64,
}

impl Scheduler {
    pub fn new(
        seed: u64,
        seeds: Vec<InputBytes>,
        engine: Engine,
        mutation: MutationConfig,
        fixed_size: bool,
        blind: bool,
    ) -> Self {
        let phase = if seeds.is_empty() || blind {
            Phase::Exploiting
        } else {
            Phase::Seeding
        };
        Self {
            phase,
            seeds: seeds.into(),
            pending_children: VecDeque::new(),
            mutator: Mutator::new(seed),
            mutation,
            engine,
            fixed_size,
            blind,
            trials_emitted: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn trials_emitted(&self) -> u64 {
        self.trials_emitted
    }

    /// Decide the next trial's input.
    pub fn next(&mut self, corpus: &mut Corpus, rng: &mut ChaCha8Rng) -> ScheduledInput {
        self.trials_emitted += 1;

        if !self.blind {
            if let Some(bytes) = self.seeds.pop_front() {
                if self.seeds.is_empty() {
                    self.phase = Phase::Exploiting;
                }
                return ScheduledInput {
                    bytes,
                    parent_id: None,
                    reason: CreationReason::Seed,
                };
            }
        }

        if self.blind || corpus.is_empty() || self.random_due(corpus.len()) {
            return ScheduledInput {
                bytes: self.random_input(rng),
                parent_id: None,
                reason: CreationReason::Random,
            };
        }

        if self.pending_children.is_empty() {
            self.refill_children(corpus, rng);
        }
        match self.pending_children.pop_front() {
            Some((bytes, parent_id)) => ScheduledInput {
                bytes,
                parent_id: Some(parent_id),
                reason: CreationReason::Favored,
            },
            // select_parent can only fail on an empty corpus, handled above.
            None => ScheduledInput {
                bytes: self.random_input(rng),
                parent_id: None,
                reason: CreationReason::Random,
            },
        }
    }

    /// Fresh-random cadence decays as the corpus grows.
    fn random_due(&self, corpus_size: usize) -> bool {
        let interval = RANDOM_TRIAL_BASE + corpus_size as u64;
        self.trials_emitted % interval == 0
    }

    /// Select a parent and derive its full child batch.
    fn refill_children(&mut self, corpus: &mut Corpus, rng: &mut ChaCha8Rng) {
        let Some(parent_id) = corpus.select_parent(rng) else {
            return;
        };
        corpus.note_mutated(parent_id);
        let Some(parent) = corpus.get(parent_id).map(|p| p.bytes.clone()) else {
            return;
        };
        let budget = mutation_budget(parent.len());
        for round in 0..budget {
            // Split parents alternate full mutations with value-only ones,
            // which keep the structural skeleton and hunt branch novelty
            // inside it.
            let child = match &parent {
                InputBytes::Split(record) if round % 2 == 1 => InputBytes::Split(
                    self.mutator.mutate_values_only(record, &self.mutation),
                ),
                _ => self.mutator.mutate(&parent, &self.mutation),
            };
            self.pending_children.push_back((child, parent_id));
        }
    }

    /// A parentless input: empty streams that grow by extension, or fully
    /// random fixed-length streams when extension is off.
    fn random_input(&mut self, rng: &mut ChaCha8Rng) -> InputBytes {
        let fill = |rng: &mut ChaCha8Rng| {
            let mut bytes = vec![0u8; FIXED_RANDOM_INPUT_SIZE];
            rng.fill_bytes(&mut bytes);
            bytes
        };
        if self.engine.is_split() {
            let record = if self.fixed_size {
                SplitRecord {
                    structure: fill(rng),
                    value: fill(rng),
                    access_log: Vec::new(),
                }
            } else {
                SplitRecord::default()
            };
            InputBytes::Split(record)
        } else if self.fixed_size {
            InputBytes::Linear(fill(rng))
        } else {
            InputBytes::Linear(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{SavedInput, DEFAULT_P_RANDOM};
    use crate::coverage::CoverageMap;
    use crate::novelty::CoverageSignature;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn scheduler(seeds: Vec<InputBytes>, blind: bool) -> Scheduler {
        Scheduler::new(
            42,
            seeds,
            Engine::Zest,
            MutationConfig::default(),
            false,
            blind,
        )
    }

    fn admitted(corpus: &mut Corpus, bytes: Vec<u8>, branch: usize) -> u64 {
        let mut map = CoverageMap::new();
        map.increment(branch);
        corpus.admit(SavedInput {
            id: 0,
            parent_id: None,
            reason: CreationReason::Random,
            signature: CoverageSignature::of(&map),
            bytes: InputBytes::Linear(bytes),
            favored_branches: BTreeSet::new(),
            execution_time_ns: 1,
            mutation_count: 0,
        })
    }

    #[test]
    fn seeds_replay_exactly_once_in_order() {
        let mut sched = scheduler(
            vec![
                InputBytes::Linear(vec![1]),
                InputBytes::Linear(vec![2]),
            ],
            false,
        );
        assert_eq!(sched.phase(), Phase::Seeding);

        let mut corpus = Corpus::new(DEFAULT_P_RANDOM);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let first = sched.next(&mut corpus, &mut rng);
        assert_eq!(first.reason, CreationReason::Seed);
        assert_eq!(first.bytes, InputBytes::Linear(vec![1]));
        assert_eq!(first.parent_id, None);

        let second = sched.next(&mut corpus, &mut rng);
        assert_eq!(second.bytes, InputBytes::Linear(vec![2]));
        assert_eq!(sched.phase(), Phase::Exploiting);

        let third = sched.next(&mut corpus, &mut rng);
        assert_ne!(third.reason, CreationReason::Seed);
    }

    #[test]
    fn no_seeds_starts_exploiting() {
        let sched = scheduler(Vec::new(), false);
        assert_eq!(sched.phase(), Phase::Exploiting);
    }

    #[test]
    fn empty_corpus_yields_random_inputs() {
        let mut sched = scheduler(Vec::new(), false);
        let mut corpus = Corpus::new(DEFAULT_P_RANDOM);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let input = sched.next(&mut corpus, &mut rng);
        assert_eq!(input.reason, CreationReason::Random);
        // Extension mode: random inputs start empty and grow on demand.
        assert_eq!(input.bytes, InputBytes::Linear(Vec::new()));
    }

    #[test]
    fn corpus_parents_produce_child_batches() {
        let mut sched = scheduler(Vec::new(), false);
        let mut corpus = Corpus::new(DEFAULT_P_RANDOM);
        let parent = admitted(&mut corpus, vec![0u8; 16], 1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let mut saw_child = false;
        for _ in 0..20 {
            let input = sched.next(&mut corpus, &mut rng);
            if input.reason == CreationReason::Favored {
                assert_eq!(input.parent_id, Some(parent));
                if let InputBytes::Linear(bytes) = &input.bytes {
                    assert_eq!(bytes.len(), 16);
                }
                saw_child = true;
            }
        }
        assert!(saw_child);
        assert!(corpus.get(parent).unwrap().mutation_count > 0);
    }

    #[test]
    fn random_inputs_interleave_with_children() {
        let mut sched = scheduler(Vec::new(), false);
        let mut corpus = Corpus::new(DEFAULT_P_RANDOM);
        admitted(&mut corpus, vec![0u8; 8], 1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let mut reasons = Vec::new();
        for _ in 0..50 {
            reasons.push(sched.next(&mut corpus, &mut rng).reason);
        }
        assert!(reasons.contains(&CreationReason::Random));
        assert!(reasons.contains(&CreationReason::Favored));
    }

    #[test]
    fn blind_mode_is_all_random() {
        let mut sched = scheduler(vec![InputBytes::Linear(vec![1])], true);
        let mut corpus = Corpus::new(DEFAULT_P_RANDOM);
        admitted(&mut corpus, vec![0u8; 8], 1);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        for _ in 0..30 {
            assert_eq!(
                sched.next(&mut corpus, &mut rng).reason,
                CreationReason::Random
            );
        }
    }

    #[test]
    fn fixed_size_random_inputs_are_prefilled() {
        let mut sched = Scheduler::new(
            42,
            Vec::new(),
            Engine::Bedivfuzz,
            MutationConfig::default(),
            true,
            false,
        );
        let mut corpus = Corpus::new(DEFAULT_P_RANDOM);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let input = sched.next(&mut corpus, &mut rng);
        match input.bytes {
            InputBytes::Split(record) => {
                assert_eq!(record.structure.len(), FIXED_RANDOM_INPUT_SIZE);
                assert_eq!(record.value.len(), FIXED_RANDOM_INPUT_SIZE);
            }
            _ => panic!("bedivfuzz scheduler must emit split inputs"),
        }
    }

    #[test]
    fn deterministic_across_identical_schedulers() {
        let run = || {
            let mut sched = scheduler(Vec::new(), false);
            let mut corpus = Corpus::new(DEFAULT_P_RANDOM);
            admitted(&mut corpus, (0..32).collect(), 1);
            let mut rng = ChaCha8Rng::seed_from_u64(9);
            (0..40)
                .map(|_| sched.next(&mut corpus, &mut rng).bytes)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}

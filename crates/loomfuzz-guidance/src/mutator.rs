//! Mutation engine: derives child byte sequences from a saved parent.
//!
//! Mutation is deterministic given the engine seed: each child draws from a
//! ChaCha8 stream derived from the master seed plus a running counter, so a
//! campaign replays identically under the same seed.

use crate::choice::{SplitRecord, StreamKind};
use crate::corpus::InputBytes;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Policy knobs for the mutation engine.
#[derive(Debug, Clone)]
pub struct MutationConfig {
    /// Probability a split-mode mutation targets the structure stream.
    pub structure_weight: f64,
    /// Upper bound on mutations applied per child.
    pub max_mutations: u32,
    /// Upper bound on the byte run length of one mutation.
    pub max_run_len: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            structure_weight: 0.5,
            max_mutations: 4,
            max_run_len: 4,
        }
    }
}

/// Number of children to derive from a parent of the given size:
/// floor(log2(size) + 1), with a floor of one child for tiny parents.
pub fn mutation_budget(size: usize) -> u32 {
    if size <= 1 {
        return 1;
    }
    usize::BITS - size.leading_zeros()
}

/// Derives mutated children from parent inputs.
pub struct Mutator {
    seed: u64,
    counter: u64,
}

impl Mutator {
    pub fn new(seed: u64) -> Self {
        Self { seed, counter: 0 }
    }

    fn child_rng(&mut self) -> ChaCha8Rng {
        let child_seed = self.seed.wrapping_add(self.counter);
        self.counter += 1;
        ChaCha8Rng::seed_from_u64(child_seed)
    }

    /// Derive one child from a parent.
    pub fn mutate(&mut self, parent: &InputBytes, config: &MutationConfig) -> InputBytes {
        let mut rng = self.child_rng();
        match parent {
            InputBytes::Linear(bytes) => {
                InputBytes::Linear(mutate_linear(bytes, config, &mut rng))
            }
            InputBytes::Split(record) => {
                InputBytes::Split(mutate_split(record, config, &mut rng))
            }
        }
    }

    /// Derive a split child that only rewrites value bytes, keeping the
    /// structural skeleton and access log intact. Used to hunt branch
    /// novelty inside a fixed structure.
    pub fn mutate_values_only(
        &mut self,
        record: &SplitRecord,
        config: &MutationConfig,
    ) -> SplitRecord {
        let mut rng = self.child_rng();
        let mut child = record.clone();
        let rounds = rng.gen_range(1..=config.max_mutations);
        for _ in 0..rounds {
            overwrite_random_run(&mut child.value, config.max_run_len, &mut rng);
        }
        child
    }
}

/// Overwrite a random run of up to `max_run_len` bytes with fresh random
/// bytes. No-op on an empty sequence.
fn overwrite_random_run(bytes: &mut [u8], max_run_len: usize, rng: &mut ChaCha8Rng) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    let offset = rng.gen_range(0..bytes.len());
    let run = rng.gen_range(1..=max_run_len).min(bytes.len() - offset);
    rng.fill_bytes(&mut bytes[offset..offset + run]);
    offset
}

fn mutate_linear(parent: &[u8], config: &MutationConfig, rng: &mut ChaCha8Rng) -> Vec<u8> {
    let mut child = parent.to_vec();
    let mutations = rng.gen_range(1..=config.max_mutations);
    for _ in 0..mutations {
        overwrite_random_run(&mut child, config.max_run_len, rng);
    }
    child
}

fn mutate_split(parent: &SplitRecord, config: &MutationConfig, rng: &mut ChaCha8Rng) -> SplitRecord {
    let mut child = parent.clone();
    let mutations = rng.gen_range(1..=config.max_mutations);
    let mut earliest_structural: Option<usize> = None;

    for _ in 0..mutations {
        if rng.gen_bool(config.structure_weight) {
            let offset = overwrite_random_run(&mut child.structure, config.max_run_len, rng);
            if !child.structure.is_empty() {
                earliest_structural = Some(match earliest_structural {
                    Some(prev) => prev.min(offset),
                    None => offset,
                });
            }
        } else {
            overwrite_random_run(&mut child.value, config.max_run_len, rng);
        }
    }

    // A structural edit desyncs the recorded interleaving past the edited
    // position; keep the still-valid prefix and let the next execution
    // re-record the rest.
    if let Some(offset) = earliest_structural {
        truncate_log_past_structural(&mut child.access_log, offset);
    }
    child
}

/// Truncate an access log after the read that consumed structural byte
/// `offset`.
fn truncate_log_past_structural(log: &mut Vec<StreamKind>, offset: usize) {
    let mut structural_reads = 0;
    for (pos, kind) in log.iter().enumerate() {
        if *kind == StreamKind::Structure {
            if structural_reads == offset {
                log.truncate(pos + 1);
                return;
            }
            structural_reads += 1;
        }
    }
}

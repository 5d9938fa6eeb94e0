//! The saved-input corpus and the favorites cover-set.
//!
//! Admitted inputs are append-only and immutable apart from scheduling
//! bookkeeping. For every covered branch the corpus tracks one favored
//! representative — the smallest, then fastest, input covering it — and
//! parent selection is biased toward that cover set.

use crate::choice::SplitRecord;
use crate::novelty::CoverageSignature;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default probability of picking a parent uniformly from the whole corpus
/// instead of from the favored cover set.
pub const DEFAULT_P_RANDOM: f64 = 0.1;

/// How an input came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreationReason {
    /// Loaded from the user's seed directory.
    Seed,
    /// Mutated child of a corpus parent.
    Favored,
    /// Generated from scratch with no parent.
    Random,
}

/// The concrete choice bytes of an input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputBytes {
    Linear(Vec<u8>),
    Split(SplitRecord),
}

impl InputBytes {
    /// Total byte length across streams; the "size" used for favorites
    /// tie-breaking and mutation budgets.
    pub fn len(&self) -> usize {
        match self {
            InputBytes::Linear(bytes) => bytes.len(),
            InputBytes::Split(record) => record.structure.len() + record.value.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An admitted input with its coverage signature and bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SavedInput {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub reason: CreationReason,
    pub bytes: InputBytes,
    pub signature: CoverageSignature,
    /// Branches for which this input is the current cover-set
    /// representative. Maintained by the corpus as favorites reassign.
    pub favored_branches: BTreeSet<usize>,
    pub execution_time_ns: u64,
    /// Times this input has been selected as a mutation parent.
    pub mutation_count: u64,
}

impl SavedInput {
    /// Key used to compare candidates for a favorite slot.
    fn favor_key(&self) -> (usize, u64) {
        (self.bytes.len(), self.execution_time_ns)
    }
}

/// Append-only pool of admitted inputs.
pub struct Corpus {
    inputs: Vec<SavedInput>,
    /// branch id -> input id of the current favorite.
    favorites: BTreeMap<usize, u64>,
    p_random: f64,
}

impl Corpus {
    pub fn new(p_random: f64) -> Self {
        Self {
            inputs: Vec::new(),
            favorites: BTreeMap::new(),
            p_random,
        }
    }

    /// Admit an input, assign its id, and update the favorites cover-set.
    ///
    /// A newly admitted input takes over a branch's favorite slot only when
    /// it strictly improves on the incumbent's (size, execution time) key,
    /// so reassignment happens on strict domination only. Admission and
    /// favorites reassignment are one atomic step from the caller's view:
    /// every covered branch has exactly one favorite afterwards.
    pub fn admit(&mut self, mut input: SavedInput) -> u64 {
        let id = self.inputs.len() as u64;
        input.id = id;
        input.favored_branches.clear();

        let branches: Vec<usize> = input.signature.branches().collect();
        self.inputs.push(input);

        for branch in branches {
            let take = match self.favorites.get(&branch) {
                None => true,
                Some(&incumbent_id) => {
                    let incumbent = &self.inputs[incumbent_id as usize];
                    self.inputs[id as usize].favor_key() < incumbent.favor_key()
                }
            };
            if take {
                if let Some(old_id) = self.favorites.insert(branch, id) {
                    self.inputs[old_id as usize].favored_branches.remove(&branch);
                }
                self.inputs[id as usize].favored_branches.insert(branch);
            }
        }
        id
    }

    pub fn get(&self, id: u64) -> Option<&SavedInput> {
        self.inputs.get(id as usize)
    }

    /// Inputs currently representing at least one branch.
    pub fn favored_inputs(&self) -> impl Iterator<Item = &SavedInput> {
        self.inputs.iter().filter(|i| !i.favored_branches.is_empty())
    }

    /// Pick the next mutation parent: the favored set with probability
    /// 1 - p_random, the whole corpus otherwise.
    pub fn select_parent(&self, rng: &mut impl Rng) -> Option<u64> {
        if self.inputs.is_empty() {
            return None;
        }
        if rng.gen::<f64>() >= self.p_random {
            let favored: Vec<u64> = self.favored_inputs().map(|i| i.id).collect();
            if !favored.is_empty() {
                return Some(favored[rng.gen_range(0..favored.len())]);
            }
        }
        Some(rng.gen_range(0..self.inputs.len()) as u64)
    }

    /// Record that an input was used as a mutation parent.
    pub fn note_mutated(&mut self, id: u64) {
        if let Some(input) = self.inputs.get_mut(id as usize) {
            input.mutation_count += 1;
        }
    }

    /// branch id -> favorite input id, for inspection.
    pub fn favorites(&self) -> &BTreeMap<usize, u64> {
        &self.favorites
    }

    pub fn inputs(&self) -> &[SavedInput] {
        &self.inputs
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

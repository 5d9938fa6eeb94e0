//! Failure classification and deduplication.
//!
//! A failing trial is identified by a fingerprint over the error class and
//! the topmost user-relevant stack frame. The registry keeps the first
//! input per fingerprint; later trials with the same fingerprint are still
//! counted but never persisted again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Error class used for trials that exceeded the per-trial deadline.
pub const TIMEOUT_CLASS: &str = "TrialTimeout";

/// What the harness reports about a failing trial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Error class name (exception type, panic category, ...).
    pub class: String,
    /// Topmost stack frame above the user-supplied boundary.
    pub frame: String,
    /// Human-readable message.
    pub message: String,
    /// Full stack trace as reported by the harness.
    pub stacktrace: String,
}

impl FailureInfo {
    /// The distinguished failure representing a per-trial timeout.
    pub fn timeout(limit: Duration) -> Self {
        Self {
            class: TIMEOUT_CLASS.to_string(),
            frame: String::new(),
            message: format!("trial exceeded {} ms", limit.as_millis()),
            stacktrace: String::new(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.class, &self.frame)
    }

    pub fn is_timeout(&self) -> bool {
        self.class == TIMEOUT_CLASS
    }
}

/// Hash of (error class, failing frame) identifying a failure kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// FNV-1a over class and frame, with a separator so ("ab","c") and
    /// ("a","bc") differ.
    pub fn of(class: &str, frame: &str) -> Self {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = OFFSET;
        for byte in class.bytes().chain([0u8]).chain(frame.bytes()) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(PRIME);
        }
        Fingerprint(hash)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// First-input-per-fingerprint registry. Grows monotonically; entries are
/// never removed.
#[derive(Debug, Default)]
pub struct FailureRegistry {
    seen: BTreeMap<Fingerprint, u64>,
}

impl FailureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fingerprint for the given input id. Returns true when the
    /// fingerprint is new, i.e. the caller should persist this input.
    pub fn try_register(&mut self, fingerprint: Fingerprint, input_id: u64) -> bool {
        match self.seen.entry(fingerprint) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(input_id);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn contains(&self, fingerprint: Fingerprint) -> bool {
        self.seen.contains_key(&fingerprint)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// (fingerprint, first input id) pairs in fingerprint order.
    pub fn iter(&self) -> impl Iterator<Item = (Fingerprint, u64)> + '_ {
        self.seen.iter().map(|(fp, id)| (*fp, *id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_class_and_frame() {
        let a = Fingerprint::of("ArithmeticError", "parser::parse");
        let b = Fingerprint::of("ArithmeticError", "lexer::next");
        let c = Fingerprint::of("IndexError", "parser::parse");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, Fingerprint::of("ArithmeticError", "parser::parse"));
    }

    #[test]
    fn fingerprint_separator_prevents_concatenation_collisions() {
        assert_ne!(Fingerprint::of("ab", "c"), Fingerprint::of("a", "bc"));
    }

    #[test]
    fn registry_keeps_first_input_only() {
        let mut registry = FailureRegistry::new();
        let fp = Fingerprint::of("E", "f");
        assert!(registry.try_register(fp, 3));
        assert!(!registry.try_register(fp, 9));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.iter().next(), Some((fp, 3)));
    }

    #[test]
    fn timeout_failure_is_distinguished() {
        let t = FailureInfo::timeout(Duration::from_millis(250));
        assert!(t.is_timeout());
        assert!(t.message.contains("250"));
        let other = FailureInfo {
            class: "PanicError".to_string(),
            frame: "x".to_string(),
            message: String::new(),
            stacktrace: String::new(),
        };
        assert_ne!(t.fingerprint(), other.fingerprint());
        // All timeouts share one fingerprint regardless of the limit.
        assert_eq!(
            t.fingerprint(),
            FailureInfo::timeout(Duration::from_millis(999)).fingerprint()
        );
    }
}

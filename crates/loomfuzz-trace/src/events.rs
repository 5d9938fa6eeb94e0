//! Trace event types shared between the instrumentation backend and the
//! guidance engine.
//!
//! The instrumentation backend observes the target program and emits a
//! stream of [`TraceEvent`]s per thread. Only [`TraceEvent::Branch`] affects
//! coverage; the remaining variants carry control-flow and data-flow detail
//! consumed by extension engines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of cells in the branch coverage map.
///
/// One less than 2^16 so that the modulus is odd, which spreads hashed
/// branch ids more evenly across cells.
pub const COVERAGE_MAP_SIZE: usize = (1 << 16) - 1;

/// A single event observed during an instrumented execution.
///
/// The `iid` is an opaque instruction identifier assigned by the
/// instrumentation backend. Branch events additionally carry which arm of
/// the conditional was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A conditional branch executed, taking the given arm.
    Branch { iid: u32, arm: u32 },
    /// A method call from instrumented code.
    Call { iid: u32 },
    /// A return from an instrumented method.
    Return { iid: u32 },
    /// An object allocation of the given size.
    Alloc { iid: u32, size: u64 },
    /// A field read on the given object identity.
    Read { iid: u32, object: u64, field: u32 },
}

impl TraceEvent {
    /// Map a branch event to its cell in the coverage map.
    ///
    /// Branch ids are opaque; two source branches may collide in the map.
    /// Collisions reduce feedback precision but are accepted.
    pub fn branch_index(&self) -> Option<usize> {
        match self {
            TraceEvent::Branch { iid, arm } => {
                let hash = iid.wrapping_mul(31).wrapping_add(*arm);
                Some(hash as usize % COVERAGE_MAP_SIZE)
            }
            _ => None,
        }
    }

    /// Short tag for log output.
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::Branch { .. } => "branch",
            TraceEvent::Call { .. } => "call",
            TraceEvent::Return { .. } => "return",
            TraceEvent::Alloc { .. } => "alloc",
            TraceEvent::Read { .. } => "read",
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Branch { iid, arm } => write!(f, "BRANCH iid={} arm={}", iid, arm),
            TraceEvent::Call { iid } => write!(f, "CALL   iid={}", iid),
            TraceEvent::Return { iid } => write!(f, "RETURN iid={}", iid),
            TraceEvent::Alloc { iid, size } => write!(f, "ALLOC  iid={} size={}", iid, size),
            TraceEvent::Read { iid, object, field } => {
                write!(f, "READ   iid={} obj={:#x} field={}", iid, object, field)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_index_in_range() {
        let e = TraceEvent::Branch {
            iid: u32::MAX,
            arm: u32::MAX,
        };
        assert!(e.branch_index().unwrap() < COVERAGE_MAP_SIZE);
    }

    #[test]
    fn branch_index_distinguishes_arms() {
        let a = TraceEvent::Branch { iid: 7, arm: 0 };
        let b = TraceEvent::Branch { iid: 7, arm: 1 };
        assert_ne!(a.branch_index(), b.branch_index());
    }

    #[test]
    fn non_branch_has_no_index() {
        assert_eq!(TraceEvent::Call { iid: 1 }.branch_index(), None);
        assert_eq!(TraceEvent::Return { iid: 1 }.branch_index(), None);
        assert_eq!(
            TraceEvent::Alloc { iid: 1, size: 16 }.branch_index(),
            None
        );
    }

    #[test]
    fn event_serialization_roundtrip() {
        let e = TraceEvent::Read {
            iid: 9,
            object: 0xdead_beef,
            field: 3,
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: TraceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }

    #[test]
    fn display_includes_tag() {
        let e = TraceEvent::Branch { iid: 12, arm: 1 };
        assert!(format!("{}", e).contains("BRANCH"));
        assert_eq!(e.name(), "branch");
    }
}

//! Trace event model for loomfuzz.
//!
//! The guidance engine never inspects the target program directly; it sees a
//! stream of [`events::TraceEvent`]s reported by the instrumentation
//! backend. This crate defines that event model and the per-thread
//! [`tracer::ThreadTracer`] that lifts the backend's low-level instruction
//! stream into events, scoped to a configured entry point.
//!
//! Determinism: the tracer is a pure state machine over its input stream.
//! Given the same instruction sequence it emits the same events.

pub mod events;
pub mod tracer;

pub use events::{TraceEvent, COVERAGE_MAP_SIZE};
pub use tracer::{Instruction, MethodId, ThreadTracer, TracerError};

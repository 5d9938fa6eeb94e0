//! Per-thread tracer that converts an instrumented instruction stream into
//! [`TraceEvent`]s.
//!
//! The instrumentation backend reports low-level [`Instruction`]s for each
//! thread of the target. The tracer decides which of them happen inside the
//! traced entry point and emits typed events for those. Tracking is done
//! with an explicit stack of tagged handler states that is pushed on
//! `MethodBegin` and popped on `MethodReturn`:
//!
//! - `Base` — bottom of the stack, waiting for the entry point.
//! - `TraceGenerating` — inside the entry point (or a callee of it); emits
//!   events.
//! - `MatchingNull` — inside an untraced method; swallows everything but
//!   keeps begin/return bracketing balanced.

use crate::events::TraceEvent;
use std::fmt;

/// Identifies a method by its owner and name, formatted `owner#name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodId {
    pub owner: String,
    pub name: String,
}

impl MethodId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse an `owner#name` entry-point string.
    pub fn parse(entry_point: &str) -> Result<Self, TracerError> {
        match entry_point.split_once('#') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => {
                Ok(Self::new(owner, name))
            }
            _ => Err(TracerError::InvalidEntryPoint(entry_point.to_string())),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.name)
    }
}

/// Errors raised by the tracer.
#[derive(Debug, PartialEq, Eq)]
pub enum TracerError {
    /// Entry point was not of the form `owner#name`.
    InvalidEntryPoint(String),
    /// A `MethodReturn` arrived with no matching `MethodBegin`.
    UnbalancedReturn,
}

impl fmt::Display for TracerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracerError::InvalidEntryPoint(s) => write!(f, "invalid entry point: {}", s),
            TracerError::UnbalancedReturn => write!(f, "return without matching method begin"),
        }
    }
}

impl std::error::Error for TracerError {}

/// Low-level instructions reported by the instrumentation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Control entered a method body.
    MethodBegin { iid: u32, owner: String, name: String },
    /// Control is about to leave the current method body.
    MethodReturn { iid: u32 },
    /// A call site is about to transfer control.
    Invoke {
        iid: u32,
        owner: String,
        name: String,
        invoking_super: bool,
    },
    /// A conditional branch resolved to the given arm.
    BranchTaken { iid: u32, arm: u32 },
    /// An allocation of `size` bytes.
    AllocObject { iid: u32, size: u64 },
    /// A field read.
    FieldRead { iid: u32, object: u64, field: u32 },
}

/// Handler state for one stack frame of the traced thread.
#[derive(Debug)]
enum Handler {
    Base,
    TraceGenerating {
        depth: u32,
        method: MethodId,
        invoke_target: Option<MethodId>,
        invoking_super: bool,
    },
    MatchingNull,
}

/// Converts one thread's instruction stream into trace events.
///
/// With no entry point configured, every method is traced from the first
/// `MethodBegin` onward.
pub struct ThreadTracer {
    entry_point: Option<MethodId>,
    handlers: Vec<Handler>,
    callback: Box<dyn FnMut(TraceEvent) + Send>,
}

impl ThreadTracer {
    pub fn new(
        entry_point: Option<MethodId>,
        callback: Box<dyn FnMut(TraceEvent) + Send>,
    ) -> Self {
        Self {
            entry_point,
            handlers: vec![Handler::Base],
            callback,
        }
    }

    /// Feed one instruction through the handler stack.
    pub fn consume(&mut self, inst: &Instruction) -> Result<(), TracerError> {
        match inst {
            Instruction::MethodBegin { iid, owner, name } => {
                self.on_method_begin(*iid, owner, name);
                Ok(())
            }
            Instruction::MethodReturn { iid } => self.on_method_return(*iid),
            Instruction::Invoke {
                owner,
                name,
                invoking_super,
                ..
            } => {
                if let Some(Handler::TraceGenerating {
                    invoke_target,
                    invoking_super: flag,
                    ..
                }) = self.handlers.last_mut()
                {
                    *invoke_target = Some(MethodId::new(owner.clone(), name.clone()));
                    *flag = *invoking_super;
                }
                Ok(())
            }
            Instruction::BranchTaken { iid, arm } => {
                self.emit_if_tracing(TraceEvent::Branch { iid: *iid, arm: *arm });
                Ok(())
            }
            Instruction::AllocObject { iid, size } => {
                self.emit_if_tracing(TraceEvent::Alloc {
                    iid: *iid,
                    size: *size,
                });
                Ok(())
            }
            Instruction::FieldRead { iid, object, field } => {
                self.emit_if_tracing(TraceEvent::Read {
                    iid: *iid,
                    object: *object,
                    field: *field,
                });
                Ok(())
            }
        }
    }

    /// Current nesting depth below the entry point, if inside it.
    pub fn trace_depth(&self) -> Option<u32> {
        match self.handlers.last() {
            Some(Handler::TraceGenerating { depth, .. }) => Some(*depth),
            _ => None,
        }
    }

    fn on_method_begin(&mut self, iid: u32, owner: &str, name: &str) {
        let begun = MethodId::new(owner, name);
        let next = match self.handlers.last() {
            Some(Handler::Base) => {
                let is_entry = match &self.entry_point {
                    Some(ep) => *ep == begun,
                    None => true,
                };
                if is_entry {
                    Handler::TraceGenerating {
                        depth: 0,
                        method: begun,
                        invoke_target: None,
                        invoking_super: false,
                    }
                } else {
                    Handler::MatchingNull
                }
            }
            Some(Handler::TraceGenerating {
                depth,
                invoke_target,
                ..
            }) => {
                // A callee only generates events if it is the method the
                // enclosing frame was observed invoking; anything else is
                // classloading or runtime activity interleaved by the VM.
                let expected = invoke_target.as_ref().map(|t| *t == begun).unwrap_or(true);
                let depth = *depth;
                (self.callback)(TraceEvent::Call { iid });
                if expected {
                    Handler::TraceGenerating {
                        depth: depth + 1,
                        method: begun,
                        invoke_target: None,
                        invoking_super: false,
                    }
                } else {
                    Handler::MatchingNull
                }
            }
            Some(Handler::MatchingNull) | None => Handler::MatchingNull,
        };
        self.handlers.push(next);
    }

    fn on_method_return(&mut self, iid: u32) -> Result<(), TracerError> {
        if self.handlers.len() <= 1 {
            return Err(TracerError::UnbalancedReturn);
        }
        if let Some(Handler::TraceGenerating { .. }) = self.handlers.pop() {
            (self.callback)(TraceEvent::Return { iid });
        }
        Ok(())
    }

    fn emit_if_tracing(&mut self, event: TraceEvent) {
        if matches!(self.handlers.last(), Some(Handler::TraceGenerating { .. })) {
            (self.callback)(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collecting_tracer(entry: Option<&str>) -> (ThreadTracer, Arc<Mutex<Vec<TraceEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let entry = entry.map(|e| MethodId::parse(e).unwrap());
        let tracer = ThreadTracer::new(
            entry,
            Box::new(move |e| sink.lock().unwrap().push(e)),
        );
        (tracer, events)
    }

    fn begin(iid: u32, owner: &str, name: &str) -> Instruction {
        Instruction::MethodBegin {
            iid,
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }

    fn invoke(iid: u32, owner: &str, name: &str) -> Instruction {
        Instruction::Invoke {
            iid,
            owner: owner.to_string(),
            name: name.to_string(),
            invoking_super: false,
        }
    }

    #[test]
    fn parse_entry_point() {
        let m = MethodId::parse("com/example/ParserTest#testParse").unwrap();
        assert_eq!(m.owner, "com/example/ParserTest");
        assert_eq!(m.name, "testParse");
        assert_eq!(m.to_string(), "com/example/ParserTest#testParse");
    }

    #[test]
    fn parse_entry_point_rejects_malformed() {
        assert!(MethodId::parse("no-separator").is_err());
        assert!(MethodId::parse("#leading").is_err());
        assert!(MethodId::parse("trailing#").is_err());
    }

    #[test]
    fn branches_outside_entry_point_are_swallowed() {
        let (mut tracer, events) = collecting_tracer(Some("T#entry"));
        tracer.consume(&begin(1, "T", "setup")).unwrap();
        tracer
            .consume(&Instruction::BranchTaken { iid: 10, arm: 0 })
            .unwrap();
        tracer.consume(&Instruction::MethodReturn { iid: 2 }).unwrap();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn branches_inside_entry_point_are_emitted() {
        let (mut tracer, events) = collecting_tracer(Some("T#entry"));
        tracer.consume(&begin(1, "T", "entry")).unwrap();
        tracer
            .consume(&Instruction::BranchTaken { iid: 10, arm: 1 })
            .unwrap();
        let seen = events.lock().unwrap().clone();
        assert_eq!(seen, vec![TraceEvent::Branch { iid: 10, arm: 1 }]);
    }

    #[test]
    fn nested_call_emits_call_and_return() {
        let (mut tracer, events) = collecting_tracer(Some("T#entry"));
        tracer.consume(&begin(1, "T", "entry")).unwrap();
        tracer.consume(&invoke(2, "T", "helper")).unwrap();
        tracer.consume(&begin(3, "T", "helper")).unwrap();
        assert_eq!(tracer.trace_depth(), Some(1));
        tracer
            .consume(&Instruction::BranchTaken { iid: 11, arm: 0 })
            .unwrap();
        tracer.consume(&Instruction::MethodReturn { iid: 4 }).unwrap();
        assert_eq!(tracer.trace_depth(), Some(0));

        let seen = events.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                TraceEvent::Call { iid: 3 },
                TraceEvent::Branch { iid: 11, arm: 0 },
                TraceEvent::Return { iid: 4 },
            ]
        );
    }

    #[test]
    fn unexpected_callee_is_muted() {
        let (mut tracer, events) = collecting_tracer(Some("T#entry"));
        tracer.consume(&begin(1, "T", "entry")).unwrap();
        tracer.consume(&invoke(2, "T", "helper")).unwrap();
        // Classloader activity begins a different method than the one invoked.
        tracer.consume(&begin(3, "Loader", "loadClass")).unwrap();
        tracer
            .consume(&Instruction::BranchTaken { iid: 12, arm: 0 })
            .unwrap();
        tracer.consume(&Instruction::MethodReturn { iid: 4 }).unwrap();

        let seen = events.lock().unwrap().clone();
        // The call is observed, but nothing inside the muted frame is.
        assert_eq!(seen, vec![TraceEvent::Call { iid: 3 }]);
    }

    #[test]
    fn unbalanced_return_is_an_error() {
        let (mut tracer, _) = collecting_tracer(None);
        assert_eq!(
            tracer.consume(&Instruction::MethodReturn { iid: 1 }),
            Err(TracerError::UnbalancedReturn)
        );
    }

    #[test]
    fn no_entry_point_traces_everything() {
        let (mut tracer, events) = collecting_tracer(None);
        tracer.consume(&begin(1, "Any", "method")).unwrap();
        tracer
            .consume(&Instruction::AllocObject { iid: 5, size: 32 })
            .unwrap();
        tracer
            .consume(&Instruction::FieldRead {
                iid: 6,
                object: 0x10,
                field: 2,
            })
            .unwrap();
        let seen = events.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], TraceEvent::Alloc { iid: 5, size: 32 });
    }
}

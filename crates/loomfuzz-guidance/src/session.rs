//! The session loop: drives the guidance engine against a test harness.
//!
//! The harness is the adapter around user code: it builds generator
//! arguments from the trial's choice stream, invokes the target, and maps
//! whatever the target did onto a [`HarnessOutcome`]. Harness-internal
//! errors are guidance errors and end the session; target failures are
//! ordinary outcomes the loop absorbs.

use crate::failures::FailureInfo;
use crate::guidance::{
    FuzzGuidance, Guidance, GuidanceError, SessionSummary, TraceCallback, TrialInput, TrialOutcome,
};
use log::info;

/// What one invocation of the target amounted to.
#[derive(Clone, Debug)]
pub enum HarnessOutcome {
    /// Target completed, or threw an error the entry point declares
    /// expected.
    Success,
    /// An assumption on the generated arguments was violated.
    Invalid,
    /// The target failed in an unexpected way.
    Failure(FailureInfo),
}

/// Adapter that runs one trial of the user's entry point.
pub trait TestHarness {
    /// Run the target once, reading generator randomness from `input` and
    /// reporting instrumentation events to `trace`.
    ///
    /// `Err` means the harness itself broke (not the target); it aborts the
    /// session.
    fn run_trial(
        &mut self,
        input: &mut TrialInput,
        trace: &mut TraceCallback,
    ) -> Result<HarnessOutcome, GuidanceError>;
}

impl<F> TestHarness for F
where
    F: FnMut(&mut TrialInput, &mut TraceCallback) -> Result<HarnessOutcome, GuidanceError>,
{
    fn run_trial(
        &mut self,
        input: &mut TrialInput,
        trace: &mut TraceCallback,
    ) -> Result<HarnessOutcome, GuidanceError> {
        self(input, trace)
    }
}

/// Run trials until the guidance declines to schedule more, then flush and
/// summarize.
pub fn run_session<H: TestHarness>(
    guidance: &mut FuzzGuidance,
    harness: &mut H,
) -> Result<SessionSummary, GuidanceError> {
    while guidance.has_input() {
        let mut input = guidance.get_input()?;
        let mut trace = guidance.trace_callback();
        let outcome = harness.run_trial(&mut input, &mut trace)?;
        drop(trace);
        match outcome {
            HarnessOutcome::Success => guidance.handle_result(TrialOutcome::Success, None)?,
            HarnessOutcome::Invalid => guidance.handle_result(TrialOutcome::Invalid, None)?,
            HarnessOutcome::Failure(info) => {
                guidance.handle_result(TrialOutcome::Failure, Some(&info))?
            }
        }
    }
    let summary = guidance.finish()?;
    info!(
        "session done: {} execs, {} valid, {} corpus, {} unique failures",
        summary.total_execs, summary.valid_execs, summary.corpus_size, summary.unique_failures
    );
    Ok(summary)
}

//! Haptic/visual feedback for terminal attempts.

use crate::types::{AttemptId, AttemptResult, TerminalAttempt};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeedbackPattern {
    /// Short double pulse: access granted.
    SuccessPulse,
    /// Single long pulse: denied or failed.
    FailurePulse,
}

impl FeedbackPattern {
    pub fn name(&self) -> &'static str {
        match self {
            FeedbackPattern::SuccessPulse => "success-pulse",
            FeedbackPattern::FailurePulse => "failure-pulse",
        }
    }

    /// Vibration timings in milliseconds, alternating wait and vibrate.
    pub fn vibration_ms(&self) -> &'static [u32] {
        match self {
            FeedbackPattern::SuccessPulse => &[0, 200, 100, 200],
            FeedbackPattern::FailurePulse => &[0, 500],
        }
    }

    pub fn for_result(result: &AttemptResult) -> Self {
        if result.is_granted() {
            FeedbackPattern::SuccessPulse
        } else {
            FeedbackPattern::FailurePulse
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeedbackEvent {
    pub attempt: AttemptId,
    pub pattern: FeedbackPattern,
}

/// Receives feedback events, e.g. a vibration motor or a bus signal.
pub trait FeedbackSink: Send {
    fn emit(&mut self, event: FeedbackEvent);
}

impl<F> FeedbackSink for F
where
    F: FnMut(FeedbackEvent) + Send,
{
    fn emit(&mut self, event: FeedbackEvent) {
        self(event)
    }
}

/// Fires one feedback event per terminal attempt.
///
/// Attempt ids only grow, so remembering the last fired id is enough to
/// drop a repeated dispatch for the same (or an older) attempt.
pub struct FeedbackDispatcher<S> {
    sink: S,
    last_fired: Option<AttemptId>,
}

impl<S: FeedbackSink> FeedbackDispatcher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            last_fired: None,
        }
    }

    /// Returns the pattern fired, or `None` if this attempt already fired.
    pub fn dispatch(&mut self, attempt: &TerminalAttempt) -> Option<FeedbackPattern> {
        if self.last_fired.is_some_and(|last| attempt.id <= last) {
            tracing::warn!(attempt = %attempt.id, "feedback already fired for attempt; dropping");
            return None;
        }
        let pattern = FeedbackPattern::for_result(&attempt.result);
        self.last_fired = Some(attempt.id);
        self.sink.emit(FeedbackEvent {
            attempt: attempt.id,
            pattern,
        });
        Some(pattern)
    }
}

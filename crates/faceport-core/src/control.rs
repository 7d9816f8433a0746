//! The control loop: tracker, scheduler and feedback behind one entry point.
//!
//! Every state change goes through `&mut ControlLoop`, so whoever owns the
//! value (the daemon's engine task) serializes ticks, completions and
//! display expiries by construction.

use crate::feedback::{FeedbackDispatcher, FeedbackSink};
use crate::lifecycle::DEFAULT_DISPLAY_WINDOW;
use crate::presentation::LoopView;
use crate::scheduler::{Scheduler, TickOutcome};
use crate::source::{CameraUnavailable, CapturedFrame, ImageSource};
use crate::tracker::{AttemptTracker, DisplayClear, LoopError, Resolution};
use crate::types::{AttemptId, AttemptResult};
use chrono::NaiveTime;
use std::time::{Duration, Instant};

/// What the caller must do after a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Result on screen; arm a timer for `clear_at`.
    Displayed { attempt: AttemptId, clear_at: Instant },
    Discarded { attempt: AttemptId },
}

pub struct ControlLoop<S> {
    tracker: AttemptTracker,
    scheduler: Scheduler,
    dispatcher: FeedbackDispatcher<S>,
    display_window: Duration,
}

impl<S: FeedbackSink> ControlLoop<S> {
    pub fn new(scheduler: Scheduler, sink: S, system_active: bool) -> Self {
        Self {
            tracker: AttemptTracker::new(system_active),
            scheduler,
            dispatcher: FeedbackDispatcher::new(sink),
            display_window: DEFAULT_DISPLAY_WINDOW,
        }
    }

    pub fn with_display_window(mut self, window: Duration) -> Self {
        self.display_window = window;
        self
    }

    pub fn tracker(&self) -> &AttemptTracker {
        &self.tracker
    }

    pub fn policy_name(&self) -> &'static str {
        self.scheduler.policy_name()
    }

    /// Tick with an inline camera read.
    pub fn on_tick(
        &mut self,
        now: Instant,
        source: &mut dyn ImageSource,
    ) -> Result<TickOutcome, LoopError> {
        let outcome = self.scheduler.tick(now, &mut self.tracker, source)?;
        log_outcome(&outcome);
        Ok(outcome)
    }

    /// First half of a tick whose camera read happens elsewhere.
    ///
    /// On [`TickOutcome::CaptureRequested`] the caller owes exactly one
    /// [`ControlLoop::on_captured`]; until then ticks report `Capturing`.
    pub fn request_capture(&mut self, now: Instant) -> Result<TickOutcome, LoopError> {
        let outcome = self.scheduler.begin_tick(now, &mut self.tracker)?;
        log_outcome(&outcome);
        Ok(outcome)
    }

    pub fn on_captured(
        &mut self,
        captured: Result<CapturedFrame, CameraUnavailable>,
    ) -> Result<TickOutcome, LoopError> {
        let outcome = self
            .scheduler
            .complete_capture(&mut self.tracker, captured)?;
        if let TickOutcome::Inactive = outcome {
            tracing::debug!("frame dropped: loop disabled during capture");
        } else {
            log_outcome(&outcome);
        }
        Ok(outcome)
    }

    /// Record the recognition result for `attempt`.
    ///
    /// Publishes, fires feedback once and reports the display deadline; an
    /// attempt overtaken by a disable is dropped without feedback.
    pub fn on_completed(
        &mut self,
        attempt: AttemptId,
        result: AttemptResult,
        now: Instant,
    ) -> Result<Completion, LoopError> {
        match self
            .tracker
            .resolve(attempt, result, now, self.display_window)?
        {
            Resolution::Discarded { attempt } => {
                tracing::info!(attempt = %attempt, "result discarded: loop disabled while in flight");
                Ok(Completion::Discarded { attempt })
            }
            Resolution::Published { attempt, hold } => {
                match &attempt.result {
                    AttemptResult::Succeeded(o) => tracing::info!(
                        attempt = %attempt.id,
                        granted = o.access_granted,
                        employee = o.employee.as_ref().map(|e| e.name.as_str()),
                        confidence = o.confidence,
                        latency_ms = now.saturating_duration_since(attempt.captured_at).as_millis() as u64,
                        "recognition result"
                    ),
                    AttemptResult::Failed(f) => tracing::info!(
                        attempt = %attempt.id,
                        kind = %f.kind,
                        detail = %f.detail,
                        "recognition failed"
                    ),
                }
                self.dispatcher.dispatch(&attempt);
                Ok(Completion::Displayed {
                    attempt: attempt.id,
                    clear_at: hold.deadline(),
                })
            }
        }
    }

    pub fn on_display_expired(&mut self, attempt: AttemptId, now: Instant) -> DisplayClear {
        let cleared = self.tracker.expire_display(attempt, now);
        match cleared {
            DisplayClear::Cleared => tracing::debug!(attempt = %attempt, "display cleared"),
            DisplayClear::NotYet(at) => tracing::debug!(
                attempt = %attempt,
                remaining_ms = at.saturating_duration_since(now).as_millis() as u64,
                "display hold not yet elapsed"
            ),
            DisplayClear::Stale => tracing::debug!(attempt = %attempt, "stale display expiry ignored"),
        }
        cleared
    }

    /// Returns the previous value.
    pub fn set_active(&mut self, active: bool) -> bool {
        let previous = self.tracker.set_active(active);
        if previous != active {
            tracing::info!(active, "system active toggled");
        }
        previous
    }

    pub fn view(&self, local_time: NaiveTime) -> LoopView {
        LoopView::project(&self.tracker, local_time)
    }
}

fn log_outcome(outcome: &TickOutcome) {
    match outcome {
        TickOutcome::Started { attempt, frame } => {
            tracing::info!(attempt = %attempt, jpeg_bytes = frame.jpeg.len(), "capture started");
        }
        TickOutcome::CameraUnavailable(reason) => {
            tracing::debug!(reason = %reason, "tick skipped: camera unavailable");
        }
        TickOutcome::CaptureRequested => tracing::trace!("camera read requested"),
        other => tracing::trace!(outcome = ?other, "tick skipped"),
    }
}

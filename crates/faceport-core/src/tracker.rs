//! Attempt tracker: the loop's single piece of mutable state.
//!
//! Holds the one in-flight attempt and the one displayed result, and is the
//! only place either can change. Violations of single-flight or display
//! exclusivity are returned as [`LoopError`] rather than absorbed.

use crate::lifecycle::{DisplayHold, HoldState};
use crate::types::{AttemptId, AttemptResult, PendingAttempt, TerminalAttempt};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Programming invariant violations. Fatal for the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    #[error("capture requested while attempt {pending} is still pending")]
    AlreadyPending { pending: AttemptId },
    #[error("capture requested while attempt {displayed} is still displayed")]
    DisplayOccupied { displayed: AttemptId },
    #[error("capture requested while another camera read is outstanding")]
    CaptureInProgress,
    #[error("frame delivered but no capture was requested")]
    UnexpectedFrame,
    #[error("completion for attempt {got}, but pending attempt is {expected:?}")]
    UnknownAttempt {
        got: AttemptId,
        expected: Option<AttemptId>,
    },
}

/// What happened to a completed attempt.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Recorded and now on display until `hold` clears.
    Published {
        attempt: TerminalAttempt,
        hold: DisplayHold,
    },
    /// The loop was disabled while the request was in flight.
    Discarded { attempt: AttemptId },
}

/// Answer to a display-expiry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayClear {
    Cleared,
    /// Too early; the hold ends at the given instant.
    NotYet(Instant),
    /// Nothing with this id is on display.
    Stale,
}

/// A terminal attempt together with its display window.
#[derive(Debug, Clone)]
pub struct DisplayedResult {
    pub attempt: TerminalAttempt,
    pub hold: DisplayHold,
}

#[derive(Debug)]
pub struct AttemptTracker {
    system_active: bool,
    current: Option<PendingAttempt>,
    displayed: Option<DisplayedResult>,
    /// A camera read was requested and its frame has not arrived yet.
    capturing: bool,
    last_capture_at: Option<Instant>,
    next_id: u64,
}

impl AttemptTracker {
    pub fn new(system_active: bool) -> Self {
        Self {
            system_active,
            current: None,
            displayed: None,
            capturing: false,
            last_capture_at: None,
            next_id: 1,
        }
    }

    pub fn system_active(&self) -> bool {
        self.system_active
    }

    /// Toggle the operator kill switch. Returns the previous value.
    ///
    /// Disabling marks any in-flight attempt for discard; re-enabling does
    /// not revive it. A displayed result keeps its full window either way.
    pub fn set_active(&mut self, active: bool) -> bool {
        let previous = self.system_active;
        self.system_active = active;
        if !active {
            if let Some(pending) = self.current.as_mut() {
                if !pending.discard {
                    tracing::info!(attempt = %pending.id, "loop disabled; in-flight result will be discarded");
                }
                pending.discard = true;
            }
        }
        previous
    }

    pub fn pending(&self) -> Option<&PendingAttempt> {
        self.current.as_ref()
    }

    pub fn displayed(&self) -> Option<&DisplayedResult> {
        self.displayed.as_ref()
    }

    pub fn last_capture_at(&self) -> Option<Instant> {
        self.last_capture_at
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Active, nothing being captured, nothing in flight, nothing on screen.
    pub fn is_idle(&self) -> bool {
        self.system_active && !self.capturing && self.current.is_none() && self.displayed.is_none()
    }

    fn check_free(&self) -> Result<(), LoopError> {
        if self.capturing {
            return Err(LoopError::CaptureInProgress);
        }
        if let Some(pending) = &self.current {
            return Err(LoopError::AlreadyPending {
                pending: pending.id,
            });
        }
        if let Some(shown) = &self.displayed {
            return Err(LoopError::DisplayOccupied {
                displayed: shown.attempt.id,
            });
        }
        Ok(())
    }

    /// Claim the camera for one read. The slot stays taken until
    /// [`end_capture`](Self::end_capture).
    pub fn start_capture(&mut self) -> Result<(), LoopError> {
        self.check_free()?;
        self.capturing = true;
        Ok(())
    }

    /// Release the camera slot once the read returned, frame or not.
    pub fn end_capture(&mut self) -> Result<(), LoopError> {
        if !self.capturing {
            return Err(LoopError::UnexpectedFrame);
        }
        self.capturing = false;
        Ok(())
    }

    /// Open a new attempt for a frame captured at `captured_at`.
    pub fn begin(&mut self, captured_at: Instant) -> Result<AttemptId, LoopError> {
        self.check_free()?;

        let id = AttemptId(self.next_id);
        self.next_id += 1;
        self.current = Some(PendingAttempt {
            id,
            captured_at,
            discard: false,
        });
        self.last_capture_at = Some(captured_at);
        Ok(id)
    }

    /// Move the pending attempt to its terminal status and publish it.
    ///
    /// The pending slot is freed immediately; the display slot stays
    /// occupied until [`expire_display`](Self::expire_display) succeeds.
    pub fn resolve(
        &mut self,
        id: AttemptId,
        result: AttemptResult,
        now: Instant,
        window: Duration,
    ) -> Result<Resolution, LoopError> {
        let pending = match self.current.take() {
            Some(p) if p.id == id => p,
            other => {
                let expected = other.as_ref().map(PendingAttempt::id);
                self.current = other;
                return Err(LoopError::UnknownAttempt { got: id, expected });
            }
        };

        if pending.discard {
            return Ok(Resolution::Discarded { attempt: pending.id });
        }

        let attempt = pending.finish(result, now);
        let hold = DisplayHold::start(attempt.id, now, window);
        self.displayed = Some(DisplayedResult {
            attempt: attempt.clone(),
            hold,
        });
        Ok(Resolution::Published { attempt, hold })
    }

    /// Clear the displayed result once its hold has run out.
    pub fn expire_display(&mut self, id: AttemptId, now: Instant) -> DisplayClear {
        let Some(shown) = &self.displayed else {
            return DisplayClear::Stale;
        };
        if shown.hold.attempt() != id {
            return DisplayClear::Stale;
        }
        match shown.hold.state_at(now) {
            HoldState::Holding => DisplayClear::NotYet(shown.hold.deadline()),
            HoldState::Cleared => {
                self.displayed = None;
                DisplayClear::Cleared
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Failure;

    const WINDOW: Duration = Duration::from_millis(5000);

    fn ms(t0: Instant, n: u64) -> Instant {
        t0 + Duration::from_millis(n)
    }

    fn failed() -> AttemptResult {
        AttemptResult::Failed(Failure::network("connection refused"))
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);

        let a = tracker.begin(t0).unwrap();
        tracker.resolve(a, failed(), ms(t0, 10), WINDOW).unwrap();
        assert_eq!(tracker.expire_display(a, ms(t0, 5010)), DisplayClear::Cleared);
        let b = tracker.begin(ms(t0, 6000)).unwrap();

        assert!(b > a);
        assert_eq!(tracker.last_capture_at(), Some(ms(t0, 6000)));
    }

    #[test]
    fn test_second_begin_while_pending_is_rejected() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let a = tracker.begin(t0).unwrap();

        let err = tracker.begin(ms(t0, 3000)).unwrap_err();
        assert_eq!(err, LoopError::AlreadyPending { pending: a });
        assert_eq!(tracker.pending().map(PendingAttempt::id), Some(a));
    }

    #[test]
    fn test_begin_while_displayed_is_rejected() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let a = tracker.begin(t0).unwrap();
        tracker.resolve(a, failed(), ms(t0, 400), WINDOW).unwrap();

        assert!(tracker.pending().is_none());
        let err = tracker.begin(ms(t0, 3000)).unwrap_err();
        assert_eq!(err, LoopError::DisplayOccupied { displayed: a });
    }

    #[test]
    fn test_resolve_unknown_attempt_keeps_pending() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let a = tracker.begin(t0).unwrap();

        let err = tracker
            .resolve(AttemptId(99), failed(), ms(t0, 10), WINDOW)
            .unwrap_err();
        assert_eq!(
            err,
            LoopError::UnknownAttempt {
                got: AttemptId(99),
                expected: Some(a)
            }
        );
        assert!(tracker.pending().is_some());
    }

    #[test]
    fn test_resolve_twice_is_rejected() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let a = tracker.begin(t0).unwrap();
        tracker.resolve(a, failed(), ms(t0, 10), WINDOW).unwrap();

        let err = tracker.resolve(a, failed(), ms(t0, 20), WINDOW).unwrap_err();
        assert_eq!(
            err,
            LoopError::UnknownAttempt {
                got: a,
                expected: None
            }
        );
    }

    #[test]
    fn test_disable_while_pending_discards() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let a = tracker.begin(t0).unwrap();

        assert!(tracker.set_active(false));
        // Re-enabling does not revive the stale attempt.
        assert!(!tracker.set_active(true));

        let res = tracker.resolve(a, failed(), ms(t0, 500), WINDOW).unwrap();
        assert!(matches!(res, Resolution::Discarded { attempt } if attempt == a));
        assert!(tracker.displayed().is_none());
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_display_never_clears_early() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let a = tracker.begin(t0).unwrap();
        tracker.resolve(a, failed(), ms(t0, 400), WINDOW).unwrap();

        assert_eq!(
            tracker.expire_display(a, ms(t0, 5399)),
            DisplayClear::NotYet(ms(t0, 5400))
        );
        assert!(tracker.displayed().is_some());
        assert_eq!(tracker.expire_display(a, ms(t0, 5400)), DisplayClear::Cleared);
        assert!(tracker.displayed().is_none());
        assert_eq!(tracker.expire_display(a, ms(t0, 5401)), DisplayClear::Stale);
    }

    #[test]
    fn test_expiry_for_another_attempt_is_stale() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let a = tracker.begin(t0).unwrap();
        tracker.resolve(a, failed(), ms(t0, 400), WINDOW).unwrap();

        assert_eq!(
            tracker.expire_display(AttemptId(a.0 + 1), ms(t0, 9000)),
            DisplayClear::Stale
        );
        assert!(tracker.displayed().is_some());
    }

    #[test]
    fn test_capture_slot_blocks_second_read_and_begin() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);

        tracker.start_capture().unwrap();
        assert!(!tracker.is_idle());
        assert_eq!(tracker.start_capture(), Err(LoopError::CaptureInProgress));
        assert_eq!(tracker.begin(t0), Err(LoopError::CaptureInProgress));

        tracker.end_capture().unwrap();
        assert_eq!(tracker.end_capture(), Err(LoopError::UnexpectedFrame));
        let a = tracker.begin(t0).unwrap();
        assert_eq!(
            tracker.start_capture(),
            Err(LoopError::AlreadyPending { pending: a })
        );
    }

    #[test]
    fn test_disable_does_not_cut_display_short() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let a = tracker.begin(t0).unwrap();
        tracker.resolve(a, failed(), ms(t0, 400), WINDOW).unwrap();

        tracker.set_active(false);
        assert!(tracker.displayed().is_some());
        assert_eq!(tracker.expire_display(a, ms(t0, 5400)), DisplayClear::Cleared);
    }
}

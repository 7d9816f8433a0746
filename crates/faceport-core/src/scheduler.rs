//! Capture scheduler: decides, on each tick, whether to capture.
//!
//! The gates that protect single-flight and display exclusivity live in
//! [`Scheduler::begin_tick`] and apply to every policy. A [`CapturePolicy`] only
//! decides among ticks where the loop is already idle.

use crate::source::{CameraUnavailable, CapturedFrame, ImageSource};
use crate::tracker::{AttemptTracker, LoopError};
use crate::types::AttemptId;
use std::time::{Duration, Instant};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_millis(1000);
pub const DEFAULT_PRESENCE_DELAY: Duration = Duration::from_millis(2000);

/// Strategy for choosing capture moments on an idle loop.
pub trait CapturePolicy: Send {
    fn name(&self) -> &'static str;

    fn should_capture(&mut self, now: Instant, state: &AttemptTracker) -> bool;

    /// Called whenever the loop leaves idle or a capture was attempted.
    fn reset(&mut self) {}
}

/// Capture on every eligible tick, at most once per `interval`.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    interval: Duration,
}

impl FixedInterval {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedInterval {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

impl CapturePolicy for FixedInterval {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn should_capture(&mut self, now: Instant, state: &AttemptTracker) -> bool {
        match state.last_capture_at() {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }
}

/// A "someone is standing in front of the camera" signal.
pub trait PresenceSignal: Send {
    fn is_present(&mut self, now: Instant) -> bool;

    fn reset(&mut self) {}
}

/// Reports presence once the loop has been idle for `delay`.
///
/// Stands in for a real face detector on kiosks without one.
#[derive(Debug, Clone)]
pub struct DelayedPresence {
    delay: Duration,
    idle_since: Option<Instant>,
}

impl DelayedPresence {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            idle_since: None,
        }
    }
}

impl Default for DelayedPresence {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_DELAY)
    }
}

impl PresenceSignal for DelayedPresence {
    fn is_present(&mut self, now: Instant) -> bool {
        let since = *self.idle_since.get_or_insert(now);
        now.saturating_duration_since(since) >= self.delay
    }

    fn reset(&mut self) {
        self.idle_since = None;
    }
}

/// Capture only after the presence signal held true for a settle window.
///
/// A false reading restarts the window.
#[derive(Debug, Clone)]
pub struct PresenceDebounce<S> {
    signal: S,
    settle: Duration,
    stable_since: Option<Instant>,
}

impl<S: PresenceSignal> PresenceDebounce<S> {
    pub fn new(signal: S, settle: Duration) -> Self {
        Self {
            signal,
            settle,
            stable_since: None,
        }
    }
}

impl<S: PresenceSignal> CapturePolicy for PresenceDebounce<S> {
    fn name(&self) -> &'static str {
        "presence"
    }

    fn should_capture(&mut self, now: Instant, _state: &AttemptTracker) -> bool {
        if !self.signal.is_present(now) {
            self.stable_since = None;
            return false;
        }
        let since = *self.stable_since.get_or_insert(now);
        now.saturating_duration_since(since) >= self.settle
    }

    fn reset(&mut self) {
        self.stable_since = None;
        self.signal.reset();
    }
}

/// What a tick did.
#[derive(Debug)]
pub enum TickOutcome {
    Inactive,
    /// A camera read is still outstanding.
    Capturing,
    Busy(AttemptId),
    Displaying(AttemptId),
    /// Idle, but the policy chose not to capture yet.
    Deferred,
    /// The camera slot is claimed; read a frame and hand it to
    /// [`Scheduler::complete_capture`].
    CaptureRequested,
    CameraUnavailable(String),
    /// A new attempt is pending; the frame must go to the recognition client.
    Started {
        attempt: AttemptId,
        frame: CapturedFrame,
    },
}

pub struct Scheduler {
    policy: Box<dyn CapturePolicy>,
}

impl Scheduler {
    pub fn new(policy: impl CapturePolicy + 'static) -> Self {
        Self {
            policy: Box::new(policy),
        }
    }

    pub fn from_boxed(policy: Box<dyn CapturePolicy>) -> Self {
        Self { policy }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Gate the tick and, if the policy agrees, claim the camera.
    ///
    /// Returns [`TickOutcome::CaptureRequested`] when the caller must read a
    /// frame. The read may happen elsewhere (a blocking thread); until its
    /// result comes back every tick answers [`TickOutcome::Capturing`].
    pub fn begin_tick(
        &mut self,
        now: Instant,
        tracker: &mut AttemptTracker,
    ) -> Result<TickOutcome, LoopError> {
        if !tracker.system_active() {
            self.policy.reset();
            return Ok(TickOutcome::Inactive);
        }
        if tracker.is_capturing() {
            return Ok(TickOutcome::Capturing);
        }
        if let Some(pending) = tracker.pending() {
            self.policy.reset();
            return Ok(TickOutcome::Busy(pending.id()));
        }
        if let Some(shown) = tracker.displayed() {
            self.policy.reset();
            return Ok(TickOutcome::Displaying(shown.attempt.id));
        }
        if !self.policy.should_capture(now, tracker) {
            return Ok(TickOutcome::Deferred);
        }

        tracker.start_capture()?;
        Ok(TickOutcome::CaptureRequested)
    }

    /// Deliver the result of a requested camera read.
    ///
    /// A frame that arrives after the loop was disabled is dropped.
    pub fn complete_capture(
        &mut self,
        tracker: &mut AttemptTracker,
        captured: Result<CapturedFrame, CameraUnavailable>,
    ) -> Result<TickOutcome, LoopError> {
        tracker.end_capture()?;
        self.policy.reset();
        if !tracker.system_active() {
            return Ok(TickOutcome::Inactive);
        }
        match captured {
            Ok(frame) => {
                let attempt = tracker.begin(frame.captured_at)?;
                Ok(TickOutcome::Started { attempt, frame })
            }
            Err(unavailable) => Ok(TickOutcome::CameraUnavailable(unavailable.reason)),
        }
    }

    /// Gate, read inline from `source` and deliver in one step.
    pub fn tick(
        &mut self,
        now: Instant,
        tracker: &mut AttemptTracker,
        source: &mut dyn ImageSource,
    ) -> Result<TickOutcome, LoopError> {
        match self.begin_tick(now, tracker)? {
            TickOutcome::CaptureRequested => self.complete_capture(tracker, source.capture(now)),
            other => Ok(other),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("policy", &self.policy.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptResult, Failure};

    struct StubCamera {
        available: bool,
        captures: usize,
    }

    impl ImageSource for StubCamera {
        fn capture(&mut self, now: Instant) -> Result<CapturedFrame, CameraUnavailable> {
            self.captures += 1;
            if !self.available {
                return Err(CameraUnavailable::new("no device"));
            }
            Ok(CapturedFrame {
                jpeg: vec![0xFF, 0xD8],
                width: 2,
                height: 1,
                captured_at: now,
            })
        }
    }

    fn camera() -> StubCamera {
        StubCamera {
            available: true,
            captures: 0,
        }
    }

    fn ms(t0: Instant, n: u64) -> Instant {
        t0 + Duration::from_millis(n)
    }

    #[test]
    fn test_inactive_tick_never_captures() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(false);
        let mut cam = camera();
        let mut sched = Scheduler::new(FixedInterval::default());

        let out = sched.tick(t0, &mut tracker, &mut cam).unwrap();
        assert!(matches!(out, TickOutcome::Inactive));
        assert_eq!(cam.captures, 0);
    }

    #[test]
    fn test_busy_tick_does_not_overlap() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let mut cam = camera();
        let mut sched = Scheduler::new(FixedInterval::default());

        let first = sched.tick(t0, &mut tracker, &mut cam).unwrap();
        let TickOutcome::Started { attempt, .. } = first else {
            panic!("expected a capture, got {first:?}");
        };
        let second = sched.tick(ms(t0, 3000), &mut tracker, &mut cam).unwrap();
        assert!(matches!(second, TickOutcome::Busy(id) if id == attempt));
        assert_eq!(cam.captures, 1);
    }

    #[test]
    fn test_displaying_tick_waits() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let mut cam = camera();
        let mut sched = Scheduler::new(FixedInterval::default());

        let TickOutcome::Started { attempt, .. } = sched.tick(t0, &mut tracker, &mut cam).unwrap()
        else {
            panic!("expected a capture");
        };
        tracker
            .resolve(
                attempt,
                AttemptResult::Failed(Failure::timeout("30s")),
                ms(t0, 400),
                Duration::from_millis(5000),
            )
            .unwrap();

        let out = sched.tick(ms(t0, 3000), &mut tracker, &mut cam).unwrap();
        assert!(matches!(out, TickOutcome::Displaying(id) if id == attempt));
        assert_eq!(cam.captures, 1);
    }

    #[test]
    fn test_camera_unavailable_creates_no_attempt() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let mut cam = StubCamera {
            available: false,
            captures: 0,
        };
        let mut sched = Scheduler::new(FixedInterval::default());

        let out = sched.tick(t0, &mut tracker, &mut cam).unwrap();
        assert!(matches!(out, TickOutcome::CameraUnavailable(_)));
        assert!(tracker.pending().is_none());
        assert!(tracker.last_capture_at().is_none());
    }

    #[test]
    fn test_split_capture_gates_ticks_until_frame_arrives() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let mut sched = Scheduler::new(FixedInterval::default());

        let out = sched.begin_tick(t0, &mut tracker).unwrap();
        assert!(matches!(out, TickOutcome::CaptureRequested));
        // The read is slow: later ticks must not request a second one.
        for step in 1..4 {
            let out = sched.begin_tick(ms(t0, step * 3000), &mut tracker).unwrap();
            assert!(matches!(out, TickOutcome::Capturing));
        }

        let frame = camera().capture(ms(t0, 9500)).unwrap();
        let out = sched.complete_capture(&mut tracker, Ok(frame)).unwrap();
        assert!(matches!(out, TickOutcome::Started { .. }));
        assert_eq!(tracker.last_capture_at(), Some(ms(t0, 9500)));
        assert!(matches!(
            sched.begin_tick(ms(t0, 12_000), &mut tracker).unwrap(),
            TickOutcome::Busy(_)
        ));
    }

    #[test]
    fn test_frame_after_disable_is_dropped() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let mut sched = Scheduler::new(FixedInterval::default());

        sched.begin_tick(t0, &mut tracker).unwrap();
        tracker.set_active(false);
        let frame = camera().capture(ms(t0, 100)).unwrap();
        let out = sched.complete_capture(&mut tracker, Ok(frame)).unwrap();
        assert!(matches!(out, TickOutcome::Inactive));
        assert!(tracker.pending().is_none());
        assert!(!tracker.is_capturing());
    }

    #[test]
    fn test_unrequested_frame_is_an_invariant_error() {
        let mut tracker = AttemptTracker::new(true);
        let mut sched = Scheduler::new(FixedInterval::default());
        let frame = camera().capture(Instant::now()).unwrap();
        let err = sched.complete_capture(&mut tracker, Ok(frame)).unwrap_err();
        assert_eq!(err, LoopError::UnexpectedFrame);
    }

    #[test]
    fn test_fixed_interval_spacing() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let mut policy = FixedInterval::new(Duration::from_millis(3000));

        assert!(policy.should_capture(t0, &tracker));
        tracker.begin(t0).unwrap();
        assert!(!policy.should_capture(ms(t0, 2999), &tracker));
        assert!(policy.should_capture(ms(t0, 3000), &tracker));
    }

    #[test]
    fn test_delayed_presence_reports_after_delay() {
        let t0 = Instant::now();
        let mut signal = DelayedPresence::new(Duration::from_millis(2000));
        assert!(!signal.is_present(t0));
        assert!(!signal.is_present(ms(t0, 1999)));
        assert!(signal.is_present(ms(t0, 2000)));
        signal.reset();
        assert!(!signal.is_present(ms(t0, 2500)));
    }

    /// Presence readings scripted per call.
    struct Scripted(Vec<bool>);

    impl PresenceSignal for Scripted {
        fn is_present(&mut self, _now: Instant) -> bool {
            if self.0.is_empty() {
                true
            } else {
                self.0.remove(0)
            }
        }
    }

    #[test]
    fn test_debounce_requires_continuous_presence() {
        let t0 = Instant::now();
        let tracker = AttemptTracker::new(true);
        let mut policy = PresenceDebounce::new(
            Scripted(vec![true, true, false, true, true, true]),
            Duration::from_millis(1000),
        );

        assert!(!policy.should_capture(t0, &tracker));
        assert!(!policy.should_capture(ms(t0, 600), &tracker));
        // Signal drops: the settle window restarts.
        assert!(!policy.should_capture(ms(t0, 900), &tracker));
        assert!(!policy.should_capture(ms(t0, 1000), &tracker));
        assert!(!policy.should_capture(ms(t0, 1999), &tracker));
        assert!(policy.should_capture(ms(t0, 2000), &tracker));
    }

    #[test]
    fn test_presence_policy_captures_three_seconds_after_idle() {
        let t0 = Instant::now();
        let mut tracker = AttemptTracker::new(true);
        let mut cam = camera();
        let mut sched = Scheduler::new(PresenceDebounce::new(
            DelayedPresence::default(),
            DEFAULT_SETTLE_WINDOW,
        ));

        let mut started_at = None;
        for step in 0..=16 {
            let now = ms(t0, step * 250);
            if let TickOutcome::Started { .. } = sched.tick(now, &mut tracker, &mut cam).unwrap() {
                started_at = Some(step * 250);
                break;
            }
        }
        assert_eq!(started_at, Some(3000));
        assert_eq!(sched.policy_name(), "presence");
    }
}

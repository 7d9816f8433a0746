//! faceport-core: The kiosk's capture-and-recognition control loop.
//!
//! Everything here is synchronous and clock-agnostic: callers pass `now`
//! explicitly, so the daemon drives the loop from tokio timers while tests
//! drive it from a hand-rolled clock.

pub mod control;
pub mod feedback;
pub mod lifecycle;
pub mod presentation;
pub mod scheduler;
pub mod source;
pub mod tracker;
pub mod types;

pub use control::{Completion, ControlLoop};
pub use feedback::{FeedbackDispatcher, FeedbackEvent, FeedbackPattern, FeedbackSink};
pub use lifecycle::{DisplayHold, HoldState};
pub use presentation::{Greeting, LoopView, ResultView};
pub use scheduler::{
    CapturePolicy, DelayedPresence, FixedInterval, PresenceDebounce, PresenceSignal, Scheduler,
    TickOutcome,
};
pub use source::{CameraUnavailable, CapturedFrame, ImageSource};
pub use tracker::{AttemptTracker, DisplayClear, LoopError, Resolution};
pub use types::{
    AttemptId, AttemptResult, EmployeeRef, Failure, FailureKind, PendingAttempt,
    RecognitionOutcome, TerminalAttempt,
};

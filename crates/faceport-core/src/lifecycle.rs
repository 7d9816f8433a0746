//! Result lifecycle: how long a published result stays on screen.

use crate::types::AttemptId;
use std::time::{Duration, Instant};

pub const DEFAULT_DISPLAY_WINDOW: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Holding,
    Cleared,
}

/// Display window of one published result.
///
/// Fixed at publish time; there is no way to move the deadline afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayHold {
    attempt: AttemptId,
    published_at: Instant,
    window: Duration,
}

impl DisplayHold {
    pub fn start(attempt: AttemptId, published_at: Instant, window: Duration) -> Self {
        Self {
            attempt,
            published_at,
            window,
        }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Instant at which the result must disappear.
    pub fn deadline(&self) -> Instant {
        self.published_at + self.window
    }

    pub fn state_at(&self, now: Instant) -> HoldState {
        if now >= self.deadline() {
            HoldState::Cleared
        } else {
            HoldState::Holding
        }
    }
}

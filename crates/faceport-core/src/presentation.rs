//! Read-only projection of the loop for the kiosk UI.

use crate::tracker::AttemptTracker;
use crate::types::{AttemptId, AttemptResult, GENERIC_DENIAL_MESSAGE};
use chrono::{NaiveTime, Timelike};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Greeting {
    Morning,
    Afternoon,
    Evening,
}

impl Greeting {
    /// 05:00–11:59 morning, 12:00–17:59 afternoon, otherwise evening.
    pub fn at(time: NaiveTime) -> Self {
        match time.hour() {
            5..=11 => Greeting::Morning,
            12..=17 => Greeting::Afternoon,
            _ => Greeting::Evening,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Greeting::Morning => "Good morning",
            Greeting::Afternoon => "Good afternoon",
            Greeting::Evening => "Good evening",
        }
    }
}

/// The displayed result as the UI should render it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub attempt: AttemptId,
    pub granted: bool,
    /// Present only when access was granted.
    pub employee_name: Option<String>,
    /// Present only when access was denied or the attempt failed.
    pub message: Option<String>,
    pub greeting: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopView {
    pub system_active: bool,
    pub in_progress: bool,
    pub result: Option<ResultView>,
}

impl LoopView {
    pub fn project(tracker: &AttemptTracker, local_time: NaiveTime) -> Self {
        let greeting = Greeting::at(local_time).as_str().to_string();
        let result = tracker.displayed().map(|shown| {
            let attempt = shown.attempt.id;
            match &shown.attempt.result {
                AttemptResult::Succeeded(o) if o.access_granted => ResultView {
                    attempt,
                    granted: true,
                    employee_name: o.employee.as_ref().map(|e| e.name.clone()),
                    message: None,
                    greeting,
                },
                AttemptResult::Succeeded(o) => ResultView {
                    attempt,
                    granted: false,
                    employee_name: None,
                    message: Some(if o.message.trim().is_empty() {
                        GENERIC_DENIAL_MESSAGE.to_string()
                    } else {
                        o.message.clone()
                    }),
                    greeting,
                },
                AttemptResult::Failed(f) => ResultView {
                    attempt,
                    granted: false,
                    employee_name: None,
                    message: Some(f.display_message().to_string()),
                    greeting,
                },
            }
        });

        Self {
            system_active: tracker.system_active(),
            in_progress: tracker.pending().is_some(),
            result,
        }
    }
}

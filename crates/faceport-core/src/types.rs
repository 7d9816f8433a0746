use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Shown for failures that carry no usable server message.
pub const GENERIC_RETRY_MESSAGE: &str = "Unable to recognize face, please try again";
/// Shown for a denial whose server message is blank.
pub const GENERIC_DENIAL_MESSAGE: &str = "Face not recognized. Access denied.";

/// Identifier of one capture-submit-display cycle.
///
/// Assigned from a per-loop counter at capture time, so ids are unique and
/// strictly increasing for the lifetime of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Employee matched by the recognition service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRef {
    pub id: i64,
    /// Display name shown in the greeting.
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
}

/// A well-formed answer from the recognition service.
///
/// A denial is still an outcome: the call itself succeeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionOutcome {
    pub access_granted: bool,
    pub employee: Option<EmployeeRef>,
    /// Match confidence in [0, 1].
    pub confidence: Option<f32>,
    pub message: String,
    pub server_timestamp: Option<String>,
    /// Opaque liveness payload, passed through for logging.
    pub liveness: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request exceeded the client's timeout.
    Timeout,
    /// Transport-level failure: connect, TLS, reset.
    Network,
    /// The endpoint answered with an error status or an unreadable body.
    Server,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::Server => "server",
        })
    }
}

/// Why a recognition call did not produce an outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// Diagnostic detail for logs.
    pub detail: String,
    /// Human-readable message supplied by the server, if any.
    pub server_message: Option<String>,
}

impl Failure {
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            detail: detail.into(),
            server_message: None,
        }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            detail: detail.into(),
            server_message: None,
        }
    }

    pub fn server(detail: impl Into<String>, server_message: Option<String>) -> Self {
        Self {
            kind: FailureKind::Server,
            detail: detail.into(),
            server_message: server_message.filter(|m| !m.trim().is_empty()),
        }
    }

    /// Message shown to the person at the kiosk.
    ///
    /// Only server failures may surface the server's own wording.
    pub fn display_message(&self) -> &str {
        match (self.kind, &self.server_message) {
            (FailureKind::Server, Some(msg)) => msg,
            _ => GENERIC_RETRY_MESSAGE,
        }
    }
}

/// Terminal result of a recognition call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptResult {
    Succeeded(RecognitionOutcome),
    Failed(Failure),
}

impl AttemptResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, AttemptResult::Succeeded(o) if o.access_granted)
    }
}

/// The attempt currently awaiting a recognition answer.
///
/// Not `Clone`: the tracker owns the only instance, and resolving it
/// consumes the value, so an attempt can reach a terminal status once.
#[derive(Debug)]
pub struct PendingAttempt {
    pub(crate) id: AttemptId,
    pub(crate) captured_at: Instant,
    /// Set when the loop was disabled while this attempt was in flight.
    pub(crate) discard: bool,
}

impl PendingAttempt {
    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub(crate) fn finish(self, result: AttemptResult, resolved_at: Instant) -> TerminalAttempt {
        TerminalAttempt {
            id: self.id,
            captured_at: self.captured_at,
            resolved_at,
            result,
        }
    }
}

/// An attempt that reached `Succeeded` or `Failed`.
#[derive(Debug, Clone)]
pub struct TerminalAttempt {
    pub id: AttemptId,
    pub captured_at: Instant,
    pub resolved_at: Instant,
    pub result: AttemptResult,
}

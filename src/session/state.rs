use crate::classify::{ClassifiedError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Acquisition session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Preflighting,
    Acquiring,
    /// Stream live. May still be waiting for its first decoded frame.
    Active,
    /// Stream live after the blank-preview restart, waiting for a first frame
    BlankSuspect,
    /// Blank stream stopped, re-acquisition outstanding
    Restarting,
    /// Startup stalled; the manual start control is offered
    Fallback,
    Error,
}

impl SessionState {
    /// States that may own a live stream
    pub fn holds_stream(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::BlankSuspect)
    }

    /// States in which an acquisition call may be outstanding
    pub fn may_be_in_flight(&self) -> bool {
        matches!(
            self,
            SessionState::Acquiring | SessionState::Fallback | SessionState::Restarting
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Preflighting => "preflighting",
            SessionState::Acquiring => "acquiring",
            SessionState::Active => "active",
            SessionState::BlankSuspect => "blank-suspect",
            SessionState::Restarting => "restarting",
            SessionState::Fallback => "fallback",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// The one view the presentation layer renders for a state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    Loading,
    FallbackCta,
    ErrorWithRetry,
    ErrorTerminal,
    ActivePreview,
}

impl View {
    pub fn for_state(state: SessionState, error: Option<&ClassifiedError>) -> Self {
        match state {
            SessionState::Idle
            | SessionState::Preflighting
            | SessionState::Acquiring
            | SessionState::Restarting => View::Loading,
            // The preview surface must exist to decode the first frame.
            SessionState::Active | SessionState::BlankSuspect => View::ActivePreview,
            SessionState::Fallback => View::FallbackCta,
            SessionState::Error => match error {
                Some(e) if !e.is_retryable() => View::ErrorTerminal,
                _ => View::ErrorWithRetry,
            },
        }
    }
}

/// How urgently an announcement should interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Politeness {
    Polite,
    Assertive,
}

pub const MSG_IDLE: &str = "Camera stopped.";
pub const MSG_STARTING: &str = "Starting camera…";
pub const MSG_READY: &str = "Camera ready.";
pub const MSG_FALLBACK: &str = "Camera startup delayed. Please tap to start manually.";
pub const MSG_RESTARTING: &str = "Camera preview is blank. Restarting camera…";
pub const MSG_WAITING_FOR_PREVIEW: &str = "Camera restarted. Waiting for preview…";

/// One entry of the session's status stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub view: View,
    pub message: String,
    pub politeness: Politeness,
    pub error: Option<ClassifiedError>,
    /// A "Retry Camera Access" control is offered
    pub retry_available: bool,
    /// The "Start Camera" control is offered
    pub manual_start_available: bool,
    /// Token of the current acquisition; echo it back with frame and
    /// stream-ended reports.
    pub generation: u64,
    pub at: DateTime<Utc>,
}

impl SessionStatus {
    pub fn new(state: SessionState, error: Option<&ClassifiedError>, generation: u64) -> Self {
        let (message, politeness) = match (state, error) {
            (SessionState::Error, Some(e)) => (e.message.clone(), Politeness::Assertive),
            (SessionState::Error, None) => {
                (ErrorKind::Unknown.message().to_string(), Politeness::Assertive)
            }
            (SessionState::Fallback, _) => (MSG_FALLBACK.to_string(), Politeness::Assertive),
            (SessionState::Idle, _) => (MSG_IDLE.to_string(), Politeness::Polite),
            (SessionState::Preflighting | SessionState::Acquiring, _) => {
                (MSG_STARTING.to_string(), Politeness::Polite)
            }
            (SessionState::Active, _) => (MSG_READY.to_string(), Politeness::Polite),
            (SessionState::Restarting, _) => (MSG_RESTARTING.to_string(), Politeness::Polite),
            (SessionState::BlankSuspect, _) => {
                (MSG_WAITING_FOR_PREVIEW.to_string(), Politeness::Polite)
            }
        };

        let view = View::for_state(state, error);
        Self {
            state,
            view,
            message,
            politeness,
            error: error.cloned(),
            retry_available: view == View::ErrorWithRetry,
            manual_start_available: view == View::FallbackCta,
            generation,
            at: Utc::now(),
        }
    }

    pub fn idle() -> Self {
        Self::new(SessionState::Idle, None, 0)
    }
}

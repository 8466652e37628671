//! Interfaces of the collaborators around the camera session.
//!
//! None of these are driven by the acquisition state machine except the
//! [`Announcer`], which receives the session's status messages. Text
//! recognition and speech are invoked by the surrounding application (see
//! [`crate::reader`]).

use crate::session::state::Politeness;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Renders short status strings as live-region announcements
pub trait Announcer: Send + Sync + 'static {
    fn announce(&self, message: &str, politeness: Politeness);
}

/// Announcer that writes to the log, for headless use
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAnnouncer;

impl Announcer for LogAnnouncer {
    fn announce(&self, message: &str, politeness: Politeness) {
        match politeness {
            Politeness::Assertive => log::warn!("[announce] {}", message),
            Politeness::Polite => log::info!("[announce] {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecognitionError {
    #[error("image could not be decoded: {0}")]
    InvalidImage(String),
    #[error("recognition service failed: {0}")]
    Service(String),
}

/// Text recognition over an encoded frame
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, frame: &[u8]) -> Result<String, RecognitionError>;
}

/// Observable speech playback state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechState {
    pub is_speaking: bool,
    pub is_paused: bool,
    pub rate: f32,
}

impl Default for SpeechState {
    fn default() -> Self {
        Self {
            is_speaking: false,
            is_paused: false,
            rate: 1.0,
        }
    }
}

/// Speech synthesis with playback controls. Lifecycle is independent of the
/// camera session.
pub trait SpeechEngine: Send + Sync {
    fn speak(&self, text: &str);
    fn pause(&self);
    fn resume(&self);
    fn cancel(&self);
    fn state(&self) -> SpeechState;
}

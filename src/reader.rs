//! Capture a still, recognize its text, and read it aloud.

use crate::collaborators::{RecognitionError, SpeechEngine, TextRecognizer};
use crate::device::{CaptureDevice, CaptureError};
use crate::session::CameraSession;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("frame capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("text recognition failed: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("no text found in frame")]
    NoText,
}

/// Capture the current frame, recognize it and speak the result.
///
/// Speech already in progress is cancelled first. Returns the spoken text.
pub async fn read_aloud<D: CaptureDevice>(
    session: &CameraSession<D>,
    recognizer: &dyn TextRecognizer,
    speech: &dyn SpeechEngine,
) -> Result<String, ReaderError> {
    let image = session.capture_frame().await?;
    log::debug!(
        "Captured {}x{} still ({} bytes) for recognition",
        image.width,
        image.height,
        image.len()
    );

    let text = recognizer.recognize(&image.bytes).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ReaderError::NoText);
    }

    if speech.state().is_speaking {
        speech.cancel();
    }
    speech.speak(text);
    Ok(text.to_string())
}

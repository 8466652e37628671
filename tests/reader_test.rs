use async_trait::async_trait;
use livecam::collaborators::{RecognitionError, SpeechEngine, SpeechState, TextRecognizer};
use livecam::device::CaptureError;
use livecam::reader::{read_aloud, ReaderError};
use livecam::session::{CameraSession, SessionState};
use livecam::testing::{wait_for_state, ScriptedDevice, StaticEnvironment};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FixedRecognizer(Result<String, RecognitionError>);

#[async_trait]
impl TextRecognizer for FixedRecognizer {
    async fn recognize(&self, frame: &[u8]) -> Result<String, RecognitionError> {
        if frame.is_empty() {
            return Err(RecognitionError::InvalidImage("empty frame".to_string()));
        }
        self.0.clone()
    }
}

#[derive(Default)]
struct RecordingSpeech {
    spoken: Mutex<Vec<String>>,
    cancels: Mutex<usize>,
    speaking: Mutex<bool>,
}

impl SpeechEngine for RecordingSpeech {
    fn speak(&self, text: &str) {
        self.spoken.lock().unwrap().push(text.to_string());
        *self.speaking.lock().unwrap() = true;
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn cancel(&self) {
        *self.cancels.lock().unwrap() += 1;
        *self.speaking.lock().unwrap() = false;
    }

    fn state(&self) -> SpeechState {
        SpeechState {
            is_speaking: *self.speaking.lock().unwrap(),
            ..SpeechState::default()
        }
    }
}

async fn live_session() -> CameraSession<ScriptedDevice> {
    let session = CameraSession::builder(ScriptedDevice::default())
        .environment(Arc::new(StaticEnvironment::ready()))
        .mount();
    let mut watch = session.watch_status();
    let active = wait_for_state(&mut watch, SessionState::Active, Duration::from_secs(5))
        .await
        .expect("session never went active");
    session
        .report_frame_decoded(active.generation, 640, 480)
        .unwrap();
    session
}

#[tokio::test(start_paused = true)]
async fn reads_recognized_text_aloud() {
    let session = live_session().await;
    let recognizer = FixedRecognizer(Ok("  EXIT 12  \n".to_string()));
    let speech = RecordingSpeech::default();

    let text = read_aloud(&session, &recognizer, &speech).await.unwrap();
    assert_eq!(text, "EXIT 12");
    assert_eq!(*speech.spoken.lock().unwrap(), vec!["EXIT 12".to_string()]);
    assert_eq!(*speech.cancels.lock().unwrap(), 0);

    // A second read interrupts the first.
    read_aloud(&session, &recognizer, &speech).await.unwrap();
    assert_eq!(*speech.cancels.lock().unwrap(), 1);
    assert_eq!(speech.spoken.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn blank_text_is_not_spoken() {
    let session = live_session().await;
    let recognizer = FixedRecognizer(Ok("   ".to_string()));
    let speech = RecordingSpeech::default();

    let err = read_aloud(&session, &recognizer, &speech).await.unwrap_err();
    assert!(matches!(err, ReaderError::NoText));
    assert!(speech.spoken.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn recognition_failure_propagates() {
    let session = live_session().await;
    let recognizer = FixedRecognizer(Err(RecognitionError::Service("offline".to_string())));
    let speech = RecordingSpeech::default();

    let err = read_aloud(&session, &recognizer, &speech).await.unwrap_err();
    assert!(matches!(err, ReaderError::Recognition(RecognitionError::Service(_))));
}

#[tokio::test(start_paused = true)]
async fn capture_outside_active_fails() {
    let session = CameraSession::builder(ScriptedDevice::default())
        .environment(Arc::new(StaticEnvironment::insecure()))
        .mount();
    let mut watch = session.watch_status();
    wait_for_state(&mut watch, SessionState::Error, Duration::from_secs(5))
        .await
        .unwrap();

    let recognizer = FixedRecognizer(Ok("text".to_string()));
    let speech = RecordingSpeech::default();
    let err = read_aloud(&session, &recognizer, &speech).await.unwrap_err();
    assert!(matches!(err, ReaderError::Capture(CaptureError::NotActive)));
}

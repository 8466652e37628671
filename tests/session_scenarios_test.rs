//! End-to-end session scenarios against a scripted device.
//!
//! Every test runs on a paused tokio clock, so the 3 s startup watchdog and
//! the 5 s blank-preview watchdog elapse instantly and deterministically.

use livecam::classify::ErrorKind;
use livecam::device::{CaptureError, DeviceError};
use livecam::environment::EnvironmentProbe;
use livecam::permissions::{PermissionOracle, PermissionState};
use livecam::session::state::{MSG_READY, MSG_STARTING};
use livecam::session::{CameraSession, Politeness, SessionState, SessionStatus, View, Visibility};
use livecam::testing::{
    wait_for_state, AcquireStep, RecordingAnnouncer, ScriptedDevice, StaticEnvironment,
    StaticPermissions,
};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

const PATIENCE: Duration = Duration::from_secs(30);

fn mount(device: &ScriptedDevice) -> CameraSession<ScriptedDevice> {
    CameraSession::builder(device.clone())
        .environment(Arc::new(StaticEnvironment::ready()))
        .mount()
}

fn drain(history: &mut broadcast::Receiver<SessionStatus>) -> Vec<SessionState> {
    let mut states = Vec::new();
    while let Ok(status) = history.try_recv() {
        states.push(status.state);
    }
    states
}

async fn reach(session: &CameraSession<ScriptedDevice>, state: SessionState) -> SessionStatus {
    let mut watch = session.watch_status();
    wait_for_state(&mut watch, state, PATIENCE)
        .await
        .unwrap_or_else(|| panic!("session never reached {}, stuck in {}", state, session.status().state))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn fast_stream_goes_active_without_fallback() {
    let device = ScriptedDevice::new([AcquireStep::resolve_after_ms(50)]);
    let session = mount(&device);
    let mut history = session.subscribe();

    let active = reach(&session, SessionState::Active).await;
    assert_eq!(active.view, View::ActivePreview);
    session
        .report_frame_decoded(active.generation, 1280, 720)
        .unwrap();

    // Well past both watchdogs.
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(session.status().state, SessionState::Active);
    assert_eq!(device.acquire_calls(), 1);
    let states = drain(&mut history);
    assert_eq!(
        states,
        vec![
            SessionState::Preflighting,
            SessionState::Acquiring,
            SessionState::Active
        ]
    );
    assert!(!states.contains(&SessionState::Fallback));
}

#[tokio::test(start_paused = true)]
async fn hung_acquisition_falls_back_then_manual_start_recovers() {
    let device = ScriptedDevice::new([AcquireStep::Hang, AcquireStep::resolve_now()]);
    let started = Instant::now();
    let session = mount(&device);

    let fallback = reach(&session, SessionState::Fallback).await;
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(3000), "fell back after {:?}", waited);
    assert!(waited < Duration::from_millis(3100), "fell back after {:?}", waited);
    assert_eq!(fallback.view, View::FallbackCta);
    assert!(fallback.manual_start_available);
    assert_eq!(fallback.politeness, Politeness::Assertive);

    session.start_manually().unwrap();
    let active = reach(&session, SessionState::Active).await;
    assert!(active.generation > fallback.generation);
    assert_eq!(device.acquire_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn late_success_after_fallback_promotes_once() {
    let device = ScriptedDevice::new([AcquireStep::resolve_after_ms(4000)]);
    let session = mount(&device);
    let mut history = session.subscribe();

    reach(&session, SessionState::Fallback).await;
    reach(&session, SessionState::Active).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let states = drain(&mut history);
    assert_eq!(
        states,
        vec![
            SessionState::Preflighting,
            SessionState::Acquiring,
            SessionState::Fallback,
            SessionState::Active
        ]
    );
    assert_eq!(device.acquire_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn superseded_late_success_is_stopped() {
    let device = ScriptedDevice::new([
        AcquireStep::resolve_after_ms(5000),
        AcquireStep::resolve_now(),
    ]);
    let session = mount(&device);

    reach(&session, SessionState::Fallback).await;
    session.start_manually().unwrap();
    let active = reach(&session, SessionState::Active).await;

    // The first call resolves at 5 s, long after it was superseded.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let status = session.status();
    assert_eq!(status.state, SessionState::Active);
    assert_eq!(status.generation, active.generation);
    assert_eq!(device.streams().len(), 2);
    assert_eq!(device.live_streams(), 1);
}

#[tokio::test(start_paused = true)]
async fn permission_refused_while_denied_is_blocked_with_retry() {
    let device = ScriptedDevice::new([AcquireStep::reject(DeviceError::permission_refused(
        "NotAllowedError: Permission denied",
    ))]);
    let permissions = StaticPermissions::new(PermissionState::Denied);
    let session = CameraSession::builder(device.clone())
        .environment(Arc::new(StaticEnvironment::ready()))
        .permissions(PermissionOracle::new(Arc::new(permissions)))
        .mount();

    let error = reach(&session, SessionState::Error).await;
    let classified = error.error.clone().unwrap();
    assert_eq!(classified.kind, ErrorKind::PermissionBlocked);
    assert!(error.message.contains("browser settings"));
    assert!(!error.message.contains("NotAllowedError"));
    assert!(error.retry_available);
    assert_eq!(error.view, View::ErrorWithRetry);

    session.retry().unwrap();
    reach(&session, SessionState::Active).await;
    assert_eq!(device.acquire_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn blank_preview_restarts_once_then_errors() {
    let device = ScriptedDevice::new([AcquireStep::resolve_now(), AcquireStep::resolve_now()]);
    let session = mount(&device);
    let mut history = session.subscribe();

    let error = reach(&session, SessionState::Error).await;
    assert_eq!(error.error.as_ref().unwrap().kind, ErrorKind::BlankPreview);
    assert!(error.retry_available);

    let states = drain(&mut history);
    let restarts = states
        .iter()
        .filter(|s| **s == SessionState::Restarting)
        .count();
    assert_eq!(restarts, 1);
    assert!(states.contains(&SessionState::BlankSuspect));
    assert_eq!(device.acquire_calls(), 2);
    assert_eq!(device.live_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn restarted_stream_that_decodes_becomes_active() {
    let device = ScriptedDevice::new([AcquireStep::resolve_now(), AcquireStep::resolve_now()]);
    let session = mount(&device);

    let suspect = reach(&session, SessionState::BlankSuspect).await;
    assert!(!suspect.retry_available);

    // A zero-sized frame does not count.
    session.report_frame_decoded(suspect.generation, 0, 0).unwrap();
    settle().await;
    assert_eq!(session.status().state, SessionState::BlankSuspect);

    session
        .report_frame_decoded(suspect.generation, 640, 480)
        .unwrap();
    reach(&session, SessionState::Active).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(session.status().state, SessionState::Active);
    assert_eq!(device.acquire_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn stalled_restart_reaches_fallback() {
    let device = ScriptedDevice::new([AcquireStep::resolve_now(), AcquireStep::Hang]);
    let session = mount(&device);

    reach(&session, SessionState::Restarting).await;
    let fallback = reach(&session, SessionState::Fallback).await;
    assert!(fallback.manual_start_available);
}

#[tokio::test(start_paused = true)]
async fn visibility_return_resumes_lost_stream_once() {
    let device = ScriptedDevice::default();
    let session = mount(&device);

    let active = reach(&session, SessionState::Active).await;
    session
        .report_frame_decoded(active.generation, 640, 480)
        .unwrap();
    session.report_visibility(Visibility::Hidden).unwrap();
    session.report_stream_ended(active.generation).unwrap();
    settle().await;
    assert_eq!(device.live_streams(), 0);
    assert!(session.status().error.is_none());

    // Hold the resume acquisition so flickers land while it is outstanding.
    device.push(AcquireStep::resolve_after_ms(500));
    session.report_visibility(Visibility::Visible).unwrap();
    session.report_visibility(Visibility::Hidden).unwrap();
    session.report_visibility(Visibility::Visible).unwrap();
    session.report_visibility(Visibility::Visible).unwrap();

    let mut statuses = session.watch_status();
    let resumed = tokio::time::timeout(
        PATIENCE,
        statuses.wait_for(|s| s.state == SessionState::Active && s.generation > active.generation),
    )
    .await
    .expect("stream was never resumed")
    .unwrap()
    .clone();
    assert!(resumed.error.is_none());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(device.acquire_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn stream_ended_while_visible_surfaces_error() {
    let device = ScriptedDevice::default();
    let session = mount(&device);

    let active = reach(&session, SessionState::Active).await;
    session.report_stream_ended(active.generation).unwrap();

    let error = reach(&session, SessionState::Error).await;
    assert_eq!(error.error.unwrap().kind, ErrorKind::DeviceBusy);
    assert!(error.retry_available);
}

#[tokio::test(start_paused = true)]
async fn insecure_context_is_terminal() {
    let device = ScriptedDevice::default();
    let session = CameraSession::builder(device.clone())
        .environment(Arc::new(StaticEnvironment::insecure()))
        .mount();

    let error = reach(&session, SessionState::Error).await;
    assert_eq!(error.error.as_ref().unwrap().kind, ErrorKind::InsecureContext);
    assert!(!error.retry_available);
    assert_eq!(error.view, View::ErrorTerminal);

    session.retry().unwrap();
    session.start_manually().unwrap();
    settle().await;
    assert_eq!(session.status().state, SessionState::Error);
    assert_eq!(device.acquire_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_capability_is_terminal() {
    let device = ScriptedDevice::default();
    let session = CameraSession::builder(device.clone())
        .environment(Arc::new(StaticEnvironment::unsupported()))
        .mount();

    let error = reach(&session, SessionState::Error).await;
    assert_eq!(error.error.unwrap().kind, ErrorKind::Unsupported);
    assert!(!error.retry_available);
    assert_eq!(device.acquire_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn manual_start_is_noop_while_acquiring() {
    let device = ScriptedDevice::new([AcquireStep::resolve_after_ms(1000)]);
    let session = mount(&device);

    reach(&session, SessionState::Acquiring).await;
    session.start_manually().unwrap();
    session.start_manually().unwrap();
    reach(&session, SessionState::Active).await;
    session.start_manually().unwrap();
    settle().await;

    assert_eq!(device.acquire_calls(), 1);
    assert_eq!(device.max_outstanding(), 1);
    assert_eq!(session.status().state, SessionState::Active);
}

#[tokio::test(start_paused = true)]
async fn capture_requires_an_observed_frame() {
    let device = ScriptedDevice::default();
    let session = mount(&device);

    let active = reach(&session, SessionState::Active).await;
    assert_eq!(
        session.capture_frame().await.unwrap_err(),
        CaptureError::NotActive
    );

    session
        .report_frame_decoded(active.generation, 640, 480)
        .unwrap();
    settle().await;
    let image = session.capture_frame().await.unwrap();
    assert_eq!(image.mime_type, "image/jpeg");
    assert_eq!((image.width, image.height), (640, 480));
}

#[tokio::test(start_paused = true)]
async fn sample_frame_reports_stream_generation() {
    let device = ScriptedDevice::default();
    let session = mount(&device);

    let active = reach(&session, SessionState::Active).await;
    let (generation, image) = session.sample_frame().await.unwrap();
    assert_eq!(generation, active.generation);
    assert!(!image.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unmount_releases_stream_and_timers() {
    let device = ScriptedDevice::default();
    let session = mount(&device);

    reach(&session, SessionState::Active).await;
    session.unmount().await;

    assert_eq!(device.live_streams(), 0);
    assert_eq!(device.stop_calls(), 1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(device.acquire_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unmount_stops_stream_resolved_after_teardown() {
    let device = ScriptedDevice::new([AcquireStep::resolve_after_ms(1000)]);
    let session = mount(&device);

    reach(&session, SessionState::Acquiring).await;
    session.unmount().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(device.streams().len(), 1);
    assert_eq!(device.live_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn stream_resolving_alongside_unmount_is_stopped() {
    let gate = Arc::new(Notify::new());
    let device = ScriptedDevice::new([AcquireStep::resolve_on(&gate)]);
    let session = mount(&device);

    reach(&session, SessionState::Acquiring).await;
    settle().await;

    // The acquisition wakes in the same tick the shutdown is queued.
    gate.notify_one();
    session.unmount().await;
    settle().await;

    assert_eq!(device.streams().len(), 1);
    assert_eq!(device.live_streams(), 0);
    assert_eq!(device.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_session_tears_down() {
    let device = ScriptedDevice::new([AcquireStep::resolve_after_ms(100)]);
    let session = mount(&device);
    reach(&session, SessionState::Acquiring).await;
    let watch = session.watch_status();
    drop(session);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(watch.borrow().state, SessionState::Idle);
    assert_eq!(device.acquire_calls(), 1);
    assert_eq!(device.live_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn announcer_hears_each_message_once() {
    let device = ScriptedDevice::default();
    let announcer = RecordingAnnouncer::default();
    let session = CameraSession::builder(device.clone())
        .environment(Arc::new(StaticEnvironment::ready()))
        .announcer(Arc::new(announcer.clone()))
        .mount();

    reach(&session, SessionState::Active).await;
    settle().await;

    assert_eq!(
        announcer.messages(),
        vec![
            (MSG_STARTING.to_string(), Politeness::Polite),
            (MSG_READY.to_string(), Politeness::Polite),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn revoked_permission_reclassifies_error() {
    let device = ScriptedDevice::new([AcquireStep::reject(DeviceError::permission_refused(
        "NotAllowedError",
    ))]);
    let permissions = StaticPermissions::new(PermissionState::NotRequested);
    let oracle = PermissionOracle::new(Arc::new(permissions));
    let session = CameraSession::builder(device.clone())
        .environment(Arc::new(StaticEnvironment::ready()))
        .permissions(oracle.clone())
        .mount();

    let error = reach(&session, SessionState::Error).await;
    assert_eq!(error.error.unwrap().kind, ErrorKind::PermissionDenied);

    let mut statuses = session.watch_status();
    oracle.report_change(PermissionState::Denied);
    let updated = tokio::time::timeout(
        PATIENCE,
        statuses.wait_for(|s| {
            s.error
                .as_ref()
                .is_some_and(|e| e.kind == ErrorKind::PermissionBlocked)
        }),
    )
    .await
    .expect("error was never reclassified")
    .unwrap()
    .clone();
    assert_eq!(updated.state, SessionState::Error);

    // No automatic resume on permission changes.
    oracle.report_change(PermissionState::Granted);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(session.status().state, SessionState::Error);
    assert_eq!(device.acquire_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_captures_all_succeed() {
    let device = ScriptedDevice::default();
    let session = mount(&device);

    let active = reach(&session, SessionState::Active).await;
    session
        .report_frame_decoded(active.generation, 640, 480)
        .unwrap();
    settle().await;

    let captures = (0..4).map(|_| session.capture_frame());
    let results = futures::future::join_all(captures).await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(device.acquire_calls(), 1);
}

/// Capability probe that blocks its thread until released
struct GatedEnvironment {
    release: Mutex<mpsc::Receiver<()>>,
}

impl EnvironmentProbe for GatedEnvironment {
    fn is_secure_context(&self) -> bool {
        true
    }

    fn has_capture_capability(&self) -> bool {
        if let Ok(release) = self.release.lock() {
            let _ = release.recv();
        }
        true
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_preflight_keeps_session_responsive() {
    let (release, gate) = mpsc::channel();
    let device = ScriptedDevice::default();
    let session = CameraSession::builder(device.clone())
        .environment(Arc::new(GatedEnvironment {
            release: Mutex::new(gate),
        }))
        .mount();

    let answer = tokio::time::timeout(Duration::from_secs(5), session.capture_frame()).await;
    assert!(matches!(answer, Ok(Err(CaptureError::NotActive))));
    assert_eq!(session.status().state, SessionState::Preflighting);
    assert_eq!(device.acquire_calls(), 0);

    release.send(()).unwrap();
    reach(&session, SessionState::Active).await;
    assert_eq!(device.acquire_calls(), 1);
}

use crate::collaborators::Announcer;
use crate::device::{CaptureDevice, CaptureError, DeviceError};
use crate::environment::EnvironmentProbe;
use crate::errors::CameraError;
use crate::permissions::{PermissionSource, PermissionState};
use crate::session::state::{Politeness, SessionState, SessionStatus};
use crate::types::{CapturedImage, Constraints};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// What one `acquire` call does
#[derive(Debug, Clone)]
pub enum AcquireStep {
    Resolve { after: Duration },
    Reject { after: Duration, error: DeviceError },
    /// Resolves once the test notifies the gate
    ResolveOn(Arc<Notify>),
    /// Never settles
    Hang,
}

impl AcquireStep {
    pub fn resolve_now() -> Self {
        AcquireStep::Resolve {
            after: Duration::ZERO,
        }
    }

    pub fn resolve_after_ms(ms: u64) -> Self {
        AcquireStep::Resolve {
            after: Duration::from_millis(ms),
        }
    }

    pub fn resolve_on(gate: &Arc<Notify>) -> Self {
        AcquireStep::ResolveOn(gate.clone())
    }

    pub fn reject(error: DeviceError) -> Self {
        AcquireStep::Reject {
            after: Duration::ZERO,
            error,
        }
    }
}

/// Stream handed out by [`ScriptedDevice`]
#[derive(Debug, Clone)]
pub struct ScriptedStream {
    pub id: u64,
    stopped: Arc<AtomicBool>,
}

impl ScriptedStream {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct DeviceLog {
    script: VecDeque<AcquireStep>,
    acquire_calls: usize,
    outstanding: usize,
    max_outstanding: usize,
    streams: Vec<ScriptedStream>,
    stop_calls: usize,
}

/// Capture device driven by a script of acquisition outcomes.
///
/// Clones share the script and the call log. Once the script runs out every
/// call resolves immediately.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    log: Arc<Mutex<DeviceLog>>,
}

impl ScriptedDevice {
    pub fn new(script: impl IntoIterator<Item = AcquireStep>) -> Self {
        let device = Self::default();
        device.lock().script = script.into_iter().collect();
        device
    }

    pub fn push(&self, step: AcquireStep) {
        self.lock().script.push_back(step);
    }

    pub fn acquire_calls(&self) -> usize {
        self.lock().acquire_calls
    }

    /// Highest number of acquisitions outstanding at once
    pub fn max_outstanding(&self) -> usize {
        self.lock().max_outstanding
    }

    pub fn streams(&self) -> Vec<ScriptedStream> {
        self.lock().streams.clone()
    }

    /// Streams handed out and not yet stopped
    pub fn live_streams(&self) -> usize {
        self.lock().streams.iter().filter(|s| !s.is_stopped()).count()
    }

    pub fn stop_calls(&self) -> usize {
        self.lock().stop_calls
    }

    fn new_stream(&self) -> ScriptedStream {
        let mut log = self.lock();
        let stream = ScriptedStream {
            id: log.streams.len() as u64 + 1,
            stopped: Arc::new(AtomicBool::new(false)),
        };
        log.streams.push(stream.clone());
        stream
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeviceLog> {
        match self.log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CaptureDevice for ScriptedDevice {
    type Stream = ScriptedStream;

    async fn acquire(&self, _constraints: &Constraints) -> Result<ScriptedStream, DeviceError> {
        let step = {
            let mut log = self.lock();
            log.acquire_calls += 1;
            log.outstanding += 1;
            log.max_outstanding = log.max_outstanding.max(log.outstanding);
            log.script.pop_front().unwrap_or_else(AcquireStep::resolve_now)
        };

        let result = match step {
            AcquireStep::Hang => std::future::pending().await,
            AcquireStep::Resolve { after } => {
                tokio::time::sleep(after).await;
                Ok(self.new_stream())
            }
            AcquireStep::ResolveOn(gate) => {
                gate.notified().await;
                Ok(self.new_stream())
            }
            AcquireStep::Reject { after, error } => {
                tokio::time::sleep(after).await;
                Err(error)
            }
        };

        self.lock().outstanding -= 1;
        result
    }

    fn stop(&self, stream: &ScriptedStream) {
        self.lock().stop_calls += 1;
        stream.stopped.store(true, Ordering::SeqCst);
    }

    async fn capture_frame(&self, stream: &ScriptedStream) -> Result<CapturedImage, CaptureError> {
        if stream.is_stopped() {
            return Err(CaptureError::StreamStopped);
        }
        Ok(CapturedImage::jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], 640, 480))
    }
}

/// Permission source whose answer the test controls
#[derive(Debug, Clone)]
pub struct StaticPermissions {
    state: Arc<Mutex<Option<PermissionState>>>,
}

impl StaticPermissions {
    pub fn new(state: PermissionState) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(state))),
        }
    }

    /// Source whose queries fail
    pub fn failing() -> Self {
        Self {
            state: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set(&self, state: PermissionState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = Some(state);
        }
    }
}

#[async_trait]
impl PermissionSource for StaticPermissions {
    async fn query(&self) -> Result<PermissionState, CameraError> {
        self.state
            .lock()
            .ok()
            .and_then(|guard| *guard)
            .ok_or_else(|| CameraError::backend("permission query unavailable"))
    }
}

/// Fixed preflight answers
#[derive(Debug, Clone, Copy)]
pub struct StaticEnvironment {
    pub secure: bool,
    pub capable: bool,
}

impl StaticEnvironment {
    pub fn ready() -> Self {
        Self {
            secure: true,
            capable: true,
        }
    }

    pub fn insecure() -> Self {
        Self {
            secure: false,
            capable: true,
        }
    }

    pub fn unsupported() -> Self {
        Self {
            secure: true,
            capable: false,
        }
    }
}

impl EnvironmentProbe for StaticEnvironment {
    fn is_secure_context(&self) -> bool {
        self.secure
    }

    fn has_capture_capability(&self) -> bool {
        self.capable
    }
}

/// Announcer that keeps every announcement
#[derive(Debug, Clone, Default)]
pub struct RecordingAnnouncer {
    messages: Arc<Mutex<Vec<(String, Politeness)>>>,
}

impl RecordingAnnouncer {
    pub fn messages(&self) -> Vec<(String, Politeness)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Announcer for RecordingAnnouncer {
    fn announce(&self, message: &str, politeness: Politeness) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((message.to_string(), politeness));
        }
    }
}

/// Wait until the watched status reaches `state`, or give up after `timeout`.
pub async fn wait_for_state(
    status: &mut watch::Receiver<SessionStatus>,
    state: SessionState,
    timeout: Duration,
) -> Option<SessionStatus> {
    let reached = tokio::time::timeout(timeout, status.wait_for(|s| s.state == state)).await;
    match reached {
        Ok(Ok(status)) => Some(status.clone()),
        _ => None,
    }
}

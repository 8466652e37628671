//! Async driver for [`SessionMachine`].
//!
//! One tokio task owns the machine and processes a single queue of inputs:
//! user triggers, platform reports, acquisition results, and watchdog
//! expirations. Acquisitions and timers run as detached tasks that only ever
//! talk back through that queue, so the machine sees one event at a time.

use crate::classify::ErrorKind;
use crate::collaborators::Announcer;
use crate::config::{LivecamConfig, SessionConfig};
use crate::device::{CaptureDevice, CaptureError};
use crate::environment::{EnvironmentProbe, NativeEnvironment};
use crate::errors::CameraError;
use crate::permissions::{PermissionOracle, SubscriptionId};
use crate::session::machine::{
    Effect, Generation, SessionEvent, SessionMachine, TimerToken, Visibility,
};
use crate::session::state::SessionStatus;
use crate::types::{CapturedImage, Constraints, Resolution};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

const STATUS_HISTORY: usize = 64;

enum Input<S> {
    Event(SessionEvent<S>),
    Capture(oneshot::Sender<Result<CapturedImage, CaptureError>>),
    Sample(oneshot::Sender<Result<(Generation, CapturedImage), CaptureError>>),
    Shutdown,
}

/// Builder for [`CameraSession`]
pub struct SessionBuilder<D: CaptureDevice> {
    device: D,
    oracle: Option<PermissionOracle>,
    environment: Option<Arc<dyn EnvironmentProbe>>,
    config: SessionConfig,
    constraints: Constraints,
    announcer: Option<Arc<dyn Announcer>>,
}

impl<D: CaptureDevice> SessionBuilder<D> {
    pub fn permissions(mut self, oracle: PermissionOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn environment(mut self, environment: Arc<dyn EnvironmentProbe>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn announcer(mut self, announcer: Arc<dyn Announcer>) -> Self {
        self.announcer = Some(announcer);
        self
    }

    /// Spawn the session on the current tokio runtime and begin acquisition.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn mount(self) -> CameraSession<D> {
        let id = Uuid::new_v4();
        let (inputs, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::idle());
        let (history_tx, _) = broadcast::channel(STATUS_HISTORY);

        let oracle = self
            .oracle
            .unwrap_or_else(PermissionOracle::without_introspection);
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(NativeEnvironment::new(self.config.origin.clone())));

        let forward = inputs.clone();
        let subscription = oracle.subscribe(move |permission| {
            let _ = forward.send(Input::Event(SessionEvent::PermissionChanged(permission)));
        });

        let driver = Driver {
            id,
            machine: SessionMachine::new(self.config),
            device: Arc::new(self.device),
            oracle,
            subscription,
            environment,
            constraints: self.constraints,
            announcer: self.announcer,
            last_announced: None,
            timers: HashMap::new(),
            inputs: inputs.clone(),
            status_tx,
            history_tx: history_tx.clone(),
        };

        log::info!("Mounting camera session {}", id);
        let _ = inputs.send(Input::Event(SessionEvent::Mount));
        let task = tokio::spawn(driver.run(rx));

        CameraSession {
            id,
            inputs,
            status: status_rx,
            history: history_tx,
            task: Some(task),
        }
    }
}

/// A mounted camera acquisition session.
///
/// Dropping the session tears it down; [`CameraSession::unmount`] does the
/// same and waits for the stream to be released.
pub struct CameraSession<D: CaptureDevice> {
    id: Uuid,
    inputs: mpsc::UnboundedSender<Input<D::Stream>>,
    status: watch::Receiver<SessionStatus>,
    history: broadcast::Sender<SessionStatus>,
    task: Option<JoinHandle<()>>,
}

impl<D: CaptureDevice> CameraSession<D> {
    pub fn builder(device: D) -> SessionBuilder<D> {
        SessionBuilder {
            device,
            oracle: None,
            environment: None,
            config: SessionConfig::default(),
            constraints: Constraints::default(),
            announcer: None,
        }
    }

    /// Builder seeded from a full configuration
    pub fn from_config(device: D, config: &LivecamConfig) -> SessionBuilder<D> {
        Self::builder(device)
            .config(config.session.clone())
            .constraints(config.camera.constraints())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest published status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that always holds the latest status
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Every status published from now on, in order
    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatus> {
        self.history.subscribe()
    }

    /// The "Start Camera" control
    pub fn start_manually(&self) -> Result<(), CameraError> {
        self.send(SessionEvent::ManualStart)
    }

    /// The "Retry Camera Access" control
    pub fn retry(&self) -> Result<(), CameraError> {
        self.send(SessionEvent::Retry)
    }

    /// The rendering surface decoded a frame from the stream of `generation`
    pub fn report_frame_decoded(
        &self,
        generation: Generation,
        width: u32,
        height: u32,
    ) -> Result<(), CameraError> {
        self.send(SessionEvent::FrameDecoded {
            generation,
            resolution: Resolution::new(width, height),
        })
    }

    /// The platform ended the stream of `generation`
    pub fn report_stream_ended(&self, generation: Generation) -> Result<(), CameraError> {
        self.send(SessionEvent::StreamEnded { generation })
    }

    pub fn report_visibility(&self, visibility: Visibility) -> Result<(), CameraError> {
        self.send(SessionEvent::VisibilityChanged(visibility))
    }

    /// Capture an encoded still from the live stream
    pub async fn capture_frame(&self) -> Result<CapturedImage, CaptureError> {
        let (reply, response) = oneshot::channel();
        self.inputs
            .send(Input::Capture(reply))
            .map_err(|_| CaptureError::NotActive)?;
        response.await.map_err(|_| CaptureError::NotActive)?
    }

    /// Grab a frame from whatever stream the session holds, first frame
    /// or not, tagged with the stream's generation. Lets a host without a
    /// rendering surface feed [`CameraSession::report_frame_decoded`] itself.
    pub async fn sample_frame(&self) -> Result<(Generation, CapturedImage), CaptureError> {
        let (reply, response) = oneshot::channel();
        self.inputs
            .send(Input::Sample(reply))
            .map_err(|_| CaptureError::NotActive)?;
        response.await.map_err(|_| CaptureError::NotActive)?
    }

    /// Tear down: stop the stream, cancel every timer, end the event loop.
    pub async fn unmount(mut self) {
        let _ = self.inputs.send(Input::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Camera session {} task failed: {}", self.id, e);
            }
        }
    }

    fn send(&self, event: SessionEvent<D::Stream>) -> Result<(), CameraError> {
        self.inputs
            .send(Input::Event(event))
            .map_err(|_| CameraError::session_closed())
    }
}

impl<D: CaptureDevice> Drop for CameraSession<D> {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.inputs.send(Input::Shutdown);
        }
    }
}

struct Driver<D: CaptureDevice> {
    id: Uuid,
    machine: SessionMachine<D::Stream>,
    device: Arc<D>,
    oracle: PermissionOracle,
    subscription: SubscriptionId,
    environment: Arc<dyn EnvironmentProbe>,
    constraints: Constraints,
    announcer: Option<Arc<dyn Announcer>>,
    last_announced: Option<String>,
    timers: HashMap<TimerToken, JoinHandle<()>>,
    inputs: mpsc::UnboundedSender<Input<D::Stream>>,
    status_tx: watch::Sender<SessionStatus>,
    history_tx: broadcast::Sender<SessionStatus>,
}

impl<D: CaptureDevice> Driver<D> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input<D::Stream>>) {
        while let Some(input) = rx.recv().await {
            match input {
                Input::Event(event) => {
                    if let SessionEvent::TimerFired(token) = &event {
                        self.timers.remove(token);
                    }
                    self.dispatch(event);
                }
                Input::Capture(reply) => self.capture(reply),
                Input::Sample(reply) => self.sample(reply),
                Input::Shutdown => {
                    self.dispatch(SessionEvent::Unmount);
                    break;
                }
            }
        }

        // Acquisitions that resolved after the shutdown request still own a stream.
        rx.close();
        while let Ok(input) = rx.try_recv() {
            if let Input::Event(SessionEvent::AcquireResolved { generation, stream }) = input {
                log::debug!(
                    "Stopping stream of acquisition {} queued behind shutdown",
                    generation
                );
                self.device.stop(&stream);
            }
        }

        self.oracle.unsubscribe(self.subscription);
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        log::info!("Camera session {} unmounted", self.id);
    }

    fn dispatch(&mut self, event: SessionEvent<D::Stream>) {
        for effect in self.machine.handle(event) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect<D::Stream>) {
        match effect {
            Effect::RunPreflight { generation } => self.spawn_preflight(generation),
            Effect::Acquire { generation } => self.spawn_acquire(generation),
            Effect::Stop(stream) => self.device.stop(&stream),
            Effect::ArmTimer { token, after } => {
                let inputs = self.inputs.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = inputs.send(Input::Event(SessionEvent::TimerFired(token)));
                });
                if let Some(previous) = self.timers.insert(token, timer) {
                    previous.abort();
                }
            }
            Effect::CancelTimer(token) => {
                if let Some(timer) = self.timers.remove(&token) {
                    timer.abort();
                }
            }
            Effect::QueryPermission => {
                let oracle = self.oracle.clone();
                let inputs = self.inputs.clone();
                tokio::spawn(async move {
                    let permission = oracle.query().await;
                    let _ = inputs.send(Input::Event(SessionEvent::PermissionChanged(permission)));
                });
            }
            Effect::Publish(status) => self.publish(status),
        }
    }

    /// Probes may enumerate devices, so they run on the blocking pool.
    fn spawn_preflight(&self, generation: Generation) {
        let environment = self.environment.clone();
        let inputs = self.inputs.clone();

        tokio::spawn(async move {
            let probe = tokio::task::spawn_blocking(move || preflight(environment.as_ref()));
            let outcome = match probe.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("Preflight check for attempt {} failed: {}", generation, e);
                    Err(ErrorKind::Unsupported)
                }
            };
            let _ = inputs.send(Input::Event(SessionEvent::PreflightCompleted {
                generation,
                outcome,
            }));
        });
    }

    fn spawn_acquire(&self, generation: Generation) {
        let device = self.device.clone();
        let oracle = self.oracle.clone();
        let inputs = self.inputs.clone();
        let constraints = self.constraints.clone();

        tokio::spawn(async move {
            let event = match device.acquire(&constraints).await {
                Ok(stream) => SessionEvent::AcquireResolved { generation, stream },
                Err(error) => {
                    let permission = oracle.query().await;
                    SessionEvent::AcquireRejected {
                        generation,
                        error,
                        permission,
                    }
                }
            };

            // Session gone: nobody will ever stop this stream but us.
            if let Err(mpsc::error::SendError(Input::Event(SessionEvent::AcquireResolved {
                stream,
                ..
            }))) = inputs.send(Input::Event(event))
            {
                log::debug!("Session closed before acquisition {} resolved", generation);
                device.stop(&stream);
            }
        });
    }

    fn capture(&self, reply: oneshot::Sender<Result<CapturedImage, CaptureError>>) {
        let Some(stream) = self.machine.capturable_stream().cloned() else {
            let _ = reply.send(Err(CaptureError::NotActive));
            return;
        };

        let device = self.device.clone();
        tokio::spawn(async move {
            let _ = reply.send(device.capture_frame(&stream).await);
        });
    }

    fn sample(&self, reply: oneshot::Sender<Result<(Generation, CapturedImage), CaptureError>>) {
        let Some(stream) = self.machine.stream().cloned() else {
            let _ = reply.send(Err(CaptureError::NotActive));
            return;
        };

        let generation = self.machine.generation();
        let device = self.device.clone();
        tokio::spawn(async move {
            let frame = device.capture_frame(&stream).await;
            let _ = reply.send(frame.map(|image| (generation, image)));
        });
    }

    fn publish(&mut self, status: SessionStatus) {
        if let Some(announcer) = &self.announcer {
            if self.last_announced.as_deref() != Some(status.message.as_str()) {
                announcer.announce(&status.message, status.politeness);
                self.last_announced = Some(status.message.clone());
            }
        }

        // No subscribers is fine.
        let _ = self.history_tx.send(status.clone());
        self.status_tx.send_replace(status);
    }
}

fn preflight(environment: &dyn EnvironmentProbe) -> Result<(), ErrorKind> {
    if !environment.is_secure_context() {
        return Err(ErrorKind::InsecureContext);
    }
    if !environment.has_capture_capability() {
        return Err(ErrorKind::Unsupported);
    }
    Ok(())
}

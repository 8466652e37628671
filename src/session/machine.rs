//! The camera acquisition state machine.
//!
//! `SessionMachine` is synchronous and owns no runtime resources. It consumes
//! [`SessionEvent`]s and returns [`Effect`]s for a driver to execute: start an
//! acquisition, stop a stream, arm or cancel a watchdog, query permissions,
//! publish a status. Every acquisition call and every armed timer carries a
//! token; events whose token is no longer current are inert, and a stream
//! delivered by a superseded call is handed straight back to be stopped.
//!
//! ```text
//! Idle ──mount──▶ Preflighting ──ok──▶ Acquiring ──resolve──▶ Active
//!                     │                   │  └─startup timer─▶ Fallback ──late resolve──▶ Active
//!                     └─fail─▶ Error      └─reject─▶ Error        └─manual start─▶ Preflighting
//! Active ──blank timer (first time)──▶ Restarting ──resolve──▶ BlankSuspect ──frame──▶ Active
//! BlankSuspect/Active ──blank timer (restart spent)──▶ Error(blank-preview)
//! Error ──retry (retryable kinds)──▶ Preflighting
//! ```

use crate::assert_invariant;
use crate::classify::{classify, ClassifiedError, ErrorKind};
use crate::config::SessionConfig;
use crate::device::DeviceError;
use crate::invariants::Invariant;
use crate::permissions::PermissionState;
use crate::session::state::{SessionState, SessionStatus};
use crate::types::Resolution;
use std::time::Duration;

/// Token identifying one acquisition call
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Startup,
    BlankPreview,
}

/// Identifies one arming of a watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub kind: TimerKind,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Everything the session reacts to
#[derive(Debug)]
pub enum SessionEvent<S> {
    Mount,
    ManualStart,
    Retry,
    PreflightCompleted {
        generation: Generation,
        outcome: Result<(), ErrorKind>,
    },
    AcquireResolved {
        generation: Generation,
        stream: S,
    },
    AcquireRejected {
        generation: Generation,
        error: DeviceError,
        /// Permission state observed when the rejection was detected
        permission: PermissionState,
    },
    TimerFired(TimerToken),
    FrameDecoded {
        generation: Generation,
        resolution: Resolution,
    },
    StreamEnded {
        generation: Generation,
    },
    VisibilityChanged(Visibility),
    PermissionChanged(PermissionState),
    Unmount,
}

/// Work the driver must carry out, in order
#[derive(Debug)]
pub enum Effect<S> {
    RunPreflight { generation: Generation },
    Acquire { generation: Generation },
    Stop(S),
    ArmTimer { token: TimerToken, after: Duration },
    CancelTimer(TimerToken),
    QueryPermission,
    Publish(SessionStatus),
}

#[derive(Debug, Clone)]
struct SessionError {
    classified: ClassifiedError,
    /// Raw failure, kept for logs and permission reclassification
    raw: Option<DeviceError>,
}

pub struct SessionMachine<S> {
    config: SessionConfig,
    state: SessionState,
    stream: Option<S>,
    error: Option<SessionError>,
    permission: PermissionState,
    restart_attempted: bool,
    restarts_this_attempt: u32,
    startup_timer: Option<TimerToken>,
    blank_timer: Option<TimerToken>,
    in_flight: Option<Generation>,
    generation: Generation,
    next_timer_id: u64,
    frame_observed: bool,
    visibility: Visibility,
    resume_pending: bool,
    effects: Vec<Effect<S>>,
}

impl<S> SessionMachine<S> {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            stream: None,
            error: None,
            permission: PermissionState::Unknown,
            restart_attempted: false,
            restarts_this_attempt: 0,
            startup_timer: None,
            blank_timer: None,
            in_flight: None,
            generation: 0,
            next_timer_id: 0,
            frame_observed: false,
            visibility: Visibility::Visible,
            resume_pending: false,
            effects: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn error(&self) -> Option<&ClassifiedError> {
        self.error.as_ref().map(|e| &e.classified)
    }

    /// Raw failure behind the current error, never user-facing
    pub fn raw_error(&self) -> Option<&DeviceError> {
        self.error.as_ref().and_then(|e| e.raw.as_ref())
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn restart_attempted(&self) -> bool {
        self.restart_attempted
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn stream(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    pub fn frame_observed(&self) -> bool {
        self.frame_observed
    }

    pub fn startup_timer(&self) -> Option<TimerToken> {
        self.startup_timer
    }

    pub fn blank_timer(&self) -> Option<TimerToken> {
        self.blank_timer
    }

    /// The stream a manual frame capture may read from
    pub fn capturable_stream(&self) -> Option<&S> {
        match self.state {
            SessionState::Active if self.frame_observed => self.stream.as_ref(),
            _ => None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::new(self.state, self.error(), self.generation)
    }

    /// Apply one event and return the effects it produced
    pub fn handle(&mut self, event: SessionEvent<S>) -> Vec<Effect<S>> {
        let before = self.state;
        let mut stale_timer = false;

        match event {
            SessionEvent::Mount => {
                if self.state == SessionState::Idle {
                    self.begin_attempt("mount");
                } else {
                    log::debug!("Mount ignored in {}", self.state);
                }
            }
            SessionEvent::ManualStart => match self.state {
                SessionState::Fallback | SessionState::Idle => self.begin_attempt("manual start"),
                _ => log::debug!("Manual start ignored in {}", self.state),
            },
            SessionEvent::Retry => {
                let retryable = self.state == SessionState::Error
                    && self.error().is_some_and(|e| e.is_retryable());
                if retryable {
                    self.begin_attempt("retry");
                } else {
                    log::debug!("Retry ignored in {}", self.state);
                }
            }
            SessionEvent::PreflightCompleted {
                generation,
                outcome,
            } => self.on_preflight(generation, outcome),
            SessionEvent::AcquireResolved { generation, stream } => {
                self.on_resolved(generation, stream)
            }
            SessionEvent::AcquireRejected {
                generation,
                error,
                permission,
            } => self.on_rejected(generation, error, permission),
            SessionEvent::TimerFired(token) => stale_timer = !self.on_timer(token),
            SessionEvent::FrameDecoded {
                generation,
                resolution,
            } => self.on_frame(generation, resolution),
            SessionEvent::StreamEnded { generation } => self.on_stream_ended(generation),
            SessionEvent::VisibilityChanged(visibility) => self.on_visibility(visibility),
            SessionEvent::PermissionChanged(permission) => self.on_permission(permission),
            SessionEvent::Unmount => self.teardown(),
        }

        if stale_timer {
            assert_invariant!(
                Invariant::StaleTimerInert,
                self.state == before && self.effects.is_empty()
            );
        }
        self.check_invariants();

        std::mem::take(&mut self.effects)
    }

    fn begin_attempt(&mut self, trigger: &str) {
        if let Some(detached) = self.in_flight.take() {
            log::info!("Superseding outstanding acquisition {}", detached);
        }
        self.cancel_timers();
        self.release_stream();
        self.error = None;
        self.restart_attempted = false;
        self.restarts_this_attempt = 0;
        self.frame_observed = false;
        self.generation += 1;

        log::info!("Starting camera attempt {} ({})", self.generation, trigger);
        self.enter(SessionState::Preflighting);
        self.effects.push(Effect::RunPreflight {
            generation: self.generation,
        });
    }

    fn on_preflight(&mut self, generation: Generation, outcome: Result<(), ErrorKind>) {
        if generation != self.generation || self.state != SessionState::Preflighting {
            log::debug!("Stale preflight result for generation {}", generation);
            return;
        }

        match outcome {
            Err(kind) => {
                log::warn!("Camera preflight failed: {}", kind);
                self.fail(ClassifiedError::new(kind), None);
            }
            Ok(()) => {
                self.in_flight = Some(generation);
                self.enter(SessionState::Acquiring);
                self.startup_timer = Some(self.arm(TimerKind::Startup, self.config.startup_timeout()));
                self.effects.push(Effect::Acquire { generation });
            }
        }
    }

    fn on_resolved(&mut self, generation: Generation, stream: S) {
        let current = self.in_flight == Some(generation) && self.state.may_be_in_flight();
        if !current {
            log::debug!("Stopping stream from superseded acquisition {}", generation);
            self.effects.push(Effect::Stop(stream));
            return;
        }

        self.in_flight = None;
        self.cancel_startup_timer();
        self.stream = Some(stream);
        self.frame_observed = false;

        let next = match self.state {
            SessionState::Restarting => SessionState::BlankSuspect,
            SessionState::Fallback => {
                log::info!("Acquisition {} resolved after fallback", generation);
                SessionState::Active
            }
            _ => SessionState::Active,
        };
        self.enter(next);
        self.blank_timer = Some(self.arm(
            TimerKind::BlankPreview,
            self.config.blank_preview_timeout(),
        ));
        self.effects.push(Effect::QueryPermission);
    }

    fn on_rejected(&mut self, generation: Generation, error: DeviceError, permission: PermissionState) {
        if self.in_flight != Some(generation) {
            log::debug!("Ignoring rejection from superseded acquisition {}", generation);
            return;
        }

        self.in_flight = None;
        self.permission = permission;
        log::warn!("Camera acquisition {} failed: {}", generation, error);

        let classified = classify(&error, permission);
        self.fail(classified, Some(error));
    }

    /// Returns false when the token was stale.
    fn on_timer(&mut self, token: TimerToken) -> bool {
        match token.kind {
            TimerKind::Startup => {
                if self.startup_timer != Some(token) {
                    log::debug!("Stale startup watchdog {} ignored", token.id);
                    return false;
                }
                self.startup_timer = None;

                if matches!(self.state, SessionState::Acquiring | SessionState::Restarting) {
                    log::warn!(
                        "Acquisition {} did not settle within {} ms",
                        self.generation,
                        self.config.startup_timeout_ms
                    );
                    self.enter(SessionState::Fallback);
                }
                true
            }
            TimerKind::BlankPreview => {
                if self.blank_timer != Some(token) {
                    log::debug!("Stale blank-preview watchdog {} ignored", token.id);
                    return false;
                }
                self.blank_timer = None;

                if self.frame_observed || !self.state.holds_stream() {
                    return true;
                }

                let may_restart = self.state == SessionState::Active
                    && !self.restart_attempted
                    && self.config.auto_restart_on_blank;
                if may_restart {
                    self.restart();
                } else {
                    log::warn!("Camera preview still blank; giving up");
                    self.fail(ClassifiedError::new(ErrorKind::BlankPreview), None);
                }
                true
            }
        }
    }

    fn restart(&mut self) {
        log::warn!("Camera preview blank; restarting stream once");
        self.restart_attempted = true;
        self.restarts_this_attempt += 1;
        self.release_stream();
        self.generation += 1;
        self.in_flight = Some(self.generation);

        self.enter(SessionState::Restarting);
        self.startup_timer = Some(self.arm(TimerKind::Startup, self.config.startup_timeout()));
        self.effects.push(Effect::Acquire {
            generation: self.generation,
        });
    }

    fn on_frame(&mut self, generation: Generation, resolution: Resolution) {
        if !resolution.is_decoded() {
            return;
        }
        if generation != self.generation || self.stream.is_none() || self.frame_observed {
            return;
        }

        log::debug!(
            "First frame {}x{} for generation {}",
            resolution.width,
            resolution.height,
            generation
        );
        self.frame_observed = true;
        self.cancel_blank_timer();

        if self.state == SessionState::BlankSuspect {
            self.enter(SessionState::Active);
        }
    }

    fn on_stream_ended(&mut self, generation: Generation) {
        if generation != self.generation || self.stream.is_none() {
            return;
        }

        self.release_stream();
        self.cancel_blank_timer();
        self.frame_observed = false;

        if self.visibility == Visibility::Hidden {
            log::info!("Camera stream ended while hidden; waiting for the page to return");
            return;
        }

        self.fail_lost_stream("stream ended unexpectedly");
    }

    fn on_visibility(&mut self, visibility: Visibility) {
        match visibility {
            Visibility::Hidden => {
                if self.visibility == Visibility::Visible {
                    self.resume_pending = true;
                }
                self.visibility = Visibility::Hidden;
            }
            Visibility::Visible => {
                if self.visibility == Visibility::Visible {
                    return;
                }
                self.visibility = Visibility::Visible;

                // One resume chance per hidden period.
                if !std::mem::take(&mut self.resume_pending) {
                    return;
                }
                let lost = self.state.holds_stream() && self.stream.is_none() && self.error.is_none();
                if !lost {
                    return;
                }

                if self.config.resume_on_visible {
                    self.begin_attempt("resume");
                } else {
                    self.fail_lost_stream("stream ended while hidden");
                }
            }
        }
    }

    fn on_permission(&mut self, permission: PermissionState) {
        let previous = std::mem::replace(&mut self.permission, permission);
        if previous == permission {
            return;
        }

        let Some(current) = self.error.as_mut() else {
            return;
        };
        let Some(raw) = current.raw.as_ref() else {
            return;
        };
        if !current.classified.kind.is_permission() {
            return;
        }

        let reclassified = classify(raw, permission);
        if reclassified != current.classified {
            log::info!(
                "Reclassifying camera error {} -> {} after permission became {}",
                current.classified.kind,
                reclassified.kind,
                permission
            );
            current.classified = reclassified;
            let status = self.status();
            self.effects.push(Effect::Publish(status));
        }
    }

    fn teardown(&mut self) {
        if let Some(detached) = self.in_flight.take() {
            log::debug!("Detaching acquisition {} on teardown", detached);
        }
        self.cancel_timers();
        self.release_stream();
        self.error = None;
        self.restart_attempted = false;
        self.restarts_this_attempt = 0;
        self.frame_observed = false;
        self.resume_pending = false;
        self.generation += 1;

        if self.state != SessionState::Idle {
            self.enter(SessionState::Idle);
        }
    }

    fn fail_lost_stream(&mut self, reason: &str) {
        let raw = if self.permission == PermissionState::Denied {
            DeviceError::permission_refused(reason)
        } else {
            DeviceError::unavailable(reason)
        };
        let classified = classify(&raw, self.permission);
        self.fail(classified, Some(raw));
    }

    fn fail(&mut self, classified: ClassifiedError, raw: Option<DeviceError>) {
        self.in_flight = None;
        self.cancel_timers();
        self.release_stream();
        self.error = Some(SessionError { classified, raw });
        self.enter(SessionState::Error);
    }

    fn enter(&mut self, next: SessionState) {
        log::info!("Camera session {} -> {}", self.state, next);
        self.state = next;
        let status = self.status();
        self.effects.push(Effect::Publish(status));
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) -> TimerToken {
        self.next_timer_id += 1;
        let token = TimerToken {
            kind,
            id: self.next_timer_id,
        };
        self.effects.push(Effect::ArmTimer { token, after });
        token
    }

    fn cancel_startup_timer(&mut self) {
        if let Some(token) = self.startup_timer.take() {
            self.effects.push(Effect::CancelTimer(token));
        }
    }

    fn cancel_blank_timer(&mut self) {
        if let Some(token) = self.blank_timer.take() {
            self.effects.push(Effect::CancelTimer(token));
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_startup_timer();
        self.cancel_blank_timer();
    }

    fn release_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.effects.push(Effect::Stop(stream));
        }
    }

    fn check_invariants(&self) {
        assert_invariant!(
            Invariant::SingleFlight,
            match self.in_flight {
                None => true,
                Some(g) => g == self.generation && self.state.may_be_in_flight(),
            }
        );
        assert_invariant!(
            Invariant::StreamOwnership,
            self.stream.is_none() || self.state.holds_stream()
        );
        assert_invariant!(
            Invariant::ErrorOnlyInError,
            self.error.is_some() == (self.state == SessionState::Error)
        );
        assert_invariant!(
            Invariant::StartupTimerScope,
            self.startup_timer.is_none()
                || (self.in_flight.is_some()
                    && matches!(self.state, SessionState::Acquiring | SessionState::Restarting))
        );
        assert_invariant!(
            Invariant::BlankTimerScope,
            self.blank_timer.is_none() || (self.stream.is_some() && !self.frame_observed)
        );
        assert_invariant!(Invariant::RestartBound, self.restarts_this_attempt <= 1);
    }
}

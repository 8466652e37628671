//! Permission oracle
//!
//! Tracks the camera permission state through best-effort queries and
//! change notifications. A failed or impossible query degrades to
//! [`PermissionState::Unknown`], never to `Denied`.

use crate::errors::CameraError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};

/// Camera permission as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionState {
    /// The platform offers no way to introspect permissions, or the query failed
    Unknown,
    /// The user has not been asked yet
    NotRequested,
    Granted,
    Denied,
    /// Permissions exist but the camera capability itself does not
    Unsupported,
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionState::Unknown => write!(f, "unknown"),
            PermissionState::NotRequested => write!(f, "not-requested"),
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Platform permission introspection
#[async_trait]
pub trait PermissionSource: Send + Sync + 'static {
    async fn query(&self) -> Result<PermissionState, CameraError>;
}

type ChangeCallback = Arc<dyn Fn(PermissionState) + Send + Sync>;

/// Identifies a registered change callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscribers {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, ChangeCallback)>,
}

/// Shared permission state plus change fan-out.
///
/// Clones share state and subscribers.
#[derive(Clone)]
pub struct PermissionOracle {
    source: Option<Arc<dyn PermissionSource>>,
    state: Arc<RwLock<PermissionState>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl PermissionOracle {
    pub fn new(source: Arc<dyn PermissionSource>) -> Self {
        Self::build(Some(source))
    }

    /// Oracle for a platform without permission introspection. Always `Unknown`
    /// unless a change is reported explicitly.
    pub fn without_introspection() -> Self {
        Self::build(None)
    }

    /// Oracle backed by the current platform's permission probe
    pub fn native() -> Self {
        Self::new(Arc::new(NativePermissions))
    }

    fn build(source: Option<Arc<dyn PermissionSource>>) -> Self {
        Self {
            source,
            state: Arc::new(RwLock::new(PermissionState::Unknown)),
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 1,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Query the platform and record the result. Never fails.
    pub async fn query(&self) -> PermissionState {
        let observed = match &self.source {
            Some(source) => match source.query().await {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("Permission query failed, treating as unknown: {}", e);
                    PermissionState::Unknown
                }
            },
            None => PermissionState::Unknown,
        };

        self.record(observed);
        observed
    }

    /// Last recorded state without touching the platform
    pub fn current(&self) -> PermissionState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(PermissionState::Unknown)
    }

    /// Register a callback for permission transitions
    pub fn subscribe<F>(&self, on_change: F) -> SubscriptionId
    where
        F: Fn(PermissionState) + Send + Sync + 'static,
    {
        let mut subs = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = SubscriptionId(subs.next_id);
        subs.next_id += 1;
        subs.callbacks.push((id, Arc::new(on_change)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.callbacks.retain(|(sid, _)| *sid != id);
        }
    }

    /// Entry point for platform change events (e.g. revoked while backgrounded)
    pub fn report_change(&self, state: PermissionState) {
        self.record(state);
    }

    fn record(&self, state: PermissionState) {
        let previous = match self.state.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, state),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), state),
        };

        if previous == state {
            return;
        }

        log::info!("Camera permission changed: {} -> {}", previous, state);

        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let callbacks: Vec<ChangeCallback> = match self.subscribers.lock() {
            Ok(subs) => subs.callbacks.iter().map(|(_, cb)| cb.clone()).collect(),
            Err(_) => return,
        };
        for cb in callbacks {
            cb(state);
        }
    }
}

impl std::fmt::Debug for PermissionOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionOracle")
            .field("introspection", &self.source.is_some())
            .field("state", &self.current())
            .finish()
    }
}

/// Permission probe for the host operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePermissions;

#[async_trait]
impl PermissionSource for NativePermissions {
    async fn query(&self) -> Result<PermissionState, CameraError> {
        tokio::task::spawn_blocking(check_permission)
            .await
            .map_err(|e| CameraError::backend(format!("permission probe failed: {}", e)))
    }
}

/// Check camera permission status for the current platform
pub fn check_permission() -> PermissionState {
    #[cfg(target_os = "windows")]
    {
        check_permission_windows()
    }

    #[cfg(target_os = "macos")]
    {
        check_permission_macos()
    }

    #[cfg(target_os = "linux")]
    {
        check_permission_linux()
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        PermissionState::Unknown
    }
}

#[cfg(target_os = "windows")]
fn check_permission_windows() -> PermissionState {
    // Windows gates cameras through Privacy settings; enumeration is the only probe.
    match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
        Ok(devices) if !devices.is_empty() => PermissionState::Granted,
        Ok(_) => PermissionState::NotRequested,
        Err(e) => {
            log::debug!("Camera enumeration failed: {}", e);
            PermissionState::Unknown
        }
    }
}

#[cfg(target_os = "macos")]
fn check_permission_macos() -> PermissionState {
    use objc::runtime::{Class, Object};
    use objc::{msg_send, sel, sel_impl};
    use std::ffi::CString;

    let av_capture_device_class = match Class::get("AVCaptureDevice") {
        Some(class) => class,
        None => return PermissionState::Unsupported,
    };

    let av_media_type_video = match CString::new("vide") {
        Ok(s) => s,
        Err(_) => return PermissionState::Unknown,
    };

    // AVAuthorizationStatus: 0 NotDetermined, 1 Restricted, 2 Denied, 3 Authorized
    let auth_status: i64 = unsafe {
        let media_type: *mut Object =
            msg_send![av_capture_device_class, mediaTypeForString: av_media_type_video.as_ptr()];
        msg_send![av_capture_device_class, authorizationStatusForMediaType: media_type]
    };

    match auth_status {
        3 => PermissionState::Granted,
        1 | 2 => PermissionState::Denied,
        0 => PermissionState::NotRequested,
        _ => PermissionState::Unknown,
    }
}

#[cfg(target_os = "linux")]
fn check_permission_linux() -> PermissionState {
    use std::path::Path;

    let first_device = (0..10)
        .map(|i| format!("/dev/video{}", i))
        .find(|path| Path::new(path).exists());

    let Some(device) = first_device else {
        // No node to judge by; a missing device is the acquisition's problem.
        return PermissionState::Unknown;
    };

    match std::fs::OpenOptions::new().read(true).open(&device) {
        Ok(_) => PermissionState::Granted,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            log::debug!("{} not readable: {}", device, e);
            PermissionState::Denied
        }
        Err(e) => {
            log::debug!("{} probe inconclusive: {}", device, e);
            PermissionState::Unknown
        }
    }
}

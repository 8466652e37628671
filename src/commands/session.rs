use crate::config::LivecamConfig;
use crate::device::{CaptureDevice, NativeDevice};
use crate::permissions::PermissionOracle;
use crate::session::{CameraSession, Generation, SessionStatus, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tauri::{command, AppHandle, Emitter, Runtime, Webview};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Webview event carrying every status change
pub const STATUS_EVENT: &str = "livecam://status";

lazy_static::lazy_static! {
    static ref SESSION_REGISTRY: Arc<RwLock<HashMap<Uuid, Mounted<NativeDevice>>>> =
        Arc::new(RwLock::new(HashMap::new()));
}

/// A registered session and the webview that mounted it
struct Mounted<D: CaptureDevice> {
    owner: String,
    session: CameraSession<D>,
}

/// Payload of [`STATUS_EVENT`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub session_id: String,
    pub status: SessionStatus,
}

/// Still frame returned to the webview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Mount a camera session on the native device and start acquiring.
///
/// `origin` is the webview's origin; it overrides the configured one for the
/// secure-context check. A webview owns at most one session: mounting again
/// unmounts the previous one first. Returns the session id.
#[command]
pub async fn mount_camera_session<R: Runtime>(
    app: AppHandle<R>,
    webview: Webview<R>,
    config: Option<LivecamConfig>,
    origin: Option<String>,
) -> Result<String, String> {
    let mut config = match config {
        Some(config) => config,
        None => LivecamConfig::load(None).map_err(|e| e.to_string())?,
    };
    config.validate()?;
    if origin.is_some() {
        config.session.origin = origin;
    }

    let owner = webview.label().to_string();

    // Held until the new session is registered so two mounts cannot interleave.
    let mut registry = SESSION_REGISTRY.write().await;
    for previous in evict_owner(&mut registry, &owner) {
        log::info!("Replacing camera session {} of webview {}", previous.id(), owner);
        previous.unmount().await;
    }

    let session = CameraSession::from_config(NativeDevice::new(config.capture.jpeg_quality), &config)
        .permissions(PermissionOracle::native())
        .mount();
    let id = session.id();

    let mut statuses = session.subscribe();
    tokio::spawn(async move {
        loop {
            match statuses.recv().await {
                Ok(status) => {
                    let event = StatusEvent {
                        session_id: id.to_string(),
                        status,
                    };
                    if let Err(e) = app.emit(STATUS_EVENT, &event) {
                        log::warn!("Failed to emit camera status: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Status forwarder skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    registry.insert(id, Mounted { owner, session });
    log::info!("Camera session {} mounted", id);
    Ok(id.to_string())
}

/// "Start Camera" control, available in the fallback view
#[command]
pub async fn start_camera(session_id: String) -> Result<(), String> {
    let id = parse_session_id(&session_id)?;
    let registry = SESSION_REGISTRY.read().await;
    lookup(&registry, &id)?
        .start_manually()
        .map_err(|e| e.to_string())
}

/// "Retry Camera Access" control, available in the retryable error view
#[command]
pub async fn retry_camera_access(session_id: String) -> Result<(), String> {
    let id = parse_session_id(&session_id)?;
    let registry = SESSION_REGISTRY.read().await;
    lookup(&registry, &id)?.retry().map_err(|e| e.to_string())
}

#[command]
pub async fn report_frame_decoded(
    session_id: String,
    generation: Generation,
    width: u32,
    height: u32,
) -> Result<(), String> {
    let id = parse_session_id(&session_id)?;
    let registry = SESSION_REGISTRY.read().await;
    lookup(&registry, &id)?
        .report_frame_decoded(generation, width, height)
        .map_err(|e| e.to_string())
}

#[command]
pub async fn report_stream_ended(session_id: String, generation: Generation) -> Result<(), String> {
    let id = parse_session_id(&session_id)?;
    let registry = SESSION_REGISTRY.read().await;
    lookup(&registry, &id)?
        .report_stream_ended(generation)
        .map_err(|e| e.to_string())
}

#[command]
pub async fn report_visibility(session_id: String, visibility: Visibility) -> Result<(), String> {
    let id = parse_session_id(&session_id)?;
    let registry = SESSION_REGISTRY.read().await;
    lookup(&registry, &id)?
        .report_visibility(visibility)
        .map_err(|e| e.to_string())
}

#[command]
pub async fn get_camera_status(session_id: String) -> Result<SessionStatus, String> {
    let id = parse_session_id(&session_id)?;
    let registry = SESSION_REGISTRY.read().await;
    Ok(lookup(&registry, &id)?.status())
}

/// Capture a JPEG still from the live preview
#[command]
pub async fn capture_camera_frame(session_id: String) -> Result<CapturedFrame, String> {
    let id = parse_session_id(&session_id)?;
    let registry = SESSION_REGISTRY.read().await;
    let image = lookup(&registry, &id)?
        .capture_frame()
        .await
        .map_err(|e| format!("Failed to capture frame: {}", e))?;

    log::info!(
        "Captured {}x{} frame ({} bytes) from session {}",
        image.width,
        image.height,
        image.len(),
        id
    );
    Ok(CapturedFrame {
        width: image.width,
        height: image.height,
        mime_type: image.mime_type.to_string(),
        data: image.bytes.to_vec(),
    })
}

/// Tear the session down and release the camera
#[command]
pub async fn unmount_camera_session(session_id: String) -> Result<(), String> {
    let id = parse_session_id(&session_id)?;
    let session = SESSION_REGISTRY
        .write()
        .await
        .remove(&id)
        .ok_or_else(|| unknown_session(&id))?
        .session;
    session.unmount().await;
    Ok(())
}

fn parse_session_id(session_id: &str) -> Result<Uuid, String> {
    Uuid::parse_str(session_id).map_err(|_| format!("Invalid session id: {}", session_id))
}

fn lookup<'a>(
    registry: &'a HashMap<Uuid, Mounted<NativeDevice>>,
    id: &Uuid,
) -> Result<&'a CameraSession<NativeDevice>, String> {
    registry
        .get(id)
        .map(|mounted| &mounted.session)
        .ok_or_else(|| unknown_session(id))
}

/// Remove every session mounted by `owner`
fn evict_owner<D: CaptureDevice>(
    registry: &mut HashMap<Uuid, Mounted<D>>,
    owner: &str,
) -> Vec<CameraSession<D>> {
    let ids: Vec<Uuid> = registry
        .iter()
        .filter(|(_, mounted)| mounted.owner == owner)
        .map(|(id, _)| *id)
        .collect();
    ids.into_iter()
        .filter_map(|id| registry.remove(&id))
        .map(|mounted| mounted.session)
        .collect()
}

fn unknown_session(id: &Uuid) -> String {
    format!("No camera session {}", id)
}

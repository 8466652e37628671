//! livecam: reliable live camera acquisition for Tauri applications
//!
//! A camera session that always ends up somewhere the user can act on:
//! a live preview, a manual "Start Camera" prompt, or a classified error with
//! an honest retry control. Startup hangs are caught by a watchdog, a blank
//! preview is restarted at most once, and every stream is released when the
//! session goes away.
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! livecam = "0.1"
//! tauri = { version = "2.0", features = ["protocol-asset"] }
//! ```
//!
//! Then in your Tauri app:
//! ```rust,ignore
//! fn main() {
//!     tauri::Builder::default()
//!         .plugin(livecam::init())
//!         .run(tauri::generate_context!())
//!         .expect("error while running tauri application");
//! }
//! ```
//!
//! Without Tauri, mount a session directly:
//! ```rust,ignore
//! let config = livecam::LivecamConfig::load_or_default();
//! let device = livecam::device::NativeDevice::new(config.capture.jpeg_quality);
//! let session = livecam::CameraSession::from_config(device, &config).mount();
//! let mut status = session.watch_status();
//! ```
pub mod classify;
pub mod collaborators;
pub mod commands;
pub mod config;
pub mod device;
pub mod environment;
pub mod errors;
pub mod invariants;
pub mod permissions;
pub mod reader;
pub mod session;
pub mod types;

// Testing utilities - scriptable fakes for offline testing
pub mod testing;

// Re-exports for convenience
pub use classify::{classify, ClassifiedError, ErrorKind};
pub use config::LivecamConfig;
pub use device::{CaptureDevice, CaptureError, DeviceError, DeviceErrorKind};
pub use errors::CameraError;
pub use permissions::{PermissionOracle, PermissionState};
pub use session::{CameraSession, SessionState, SessionStatus, View, Visibility};
pub use types::{CapturedImage, Constraints, FacingMode, Platform, Resolution};

use tauri::{
    plugin::{Builder, TauriPlugin},
    Runtime,
};

/// Initialize the livecam plugin with all commands
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("livecam")
        .invoke_handler(tauri::generate_handler![
            commands::session::mount_camera_session,
            commands::session::start_camera,
            commands::session::retry_camera_access,
            commands::session::report_frame_decoded,
            commands::session::report_stream_ended,
            commands::session::report_visibility,
            commands::session::get_camera_status,
            commands::session::capture_camera_frame,
            commands::session::unmount_camera_session,
        ])
        .build()
}

/// Initialize logging, defaulting to `livecam=info` when `RUST_LOG` is unset
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "livecam=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        platform: Platform::current(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub platform: Platform,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "livecam");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.platform, Platform::current());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        log::info!("logging initialized twice without panicking");
    }
}

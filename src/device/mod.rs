//! Device handle: single-attempt acquire/stop/capture against a capture backend.
//!
//! Nothing in here retries. Retry, fallback and restart policy belong to the
//! acquisition session.

pub mod native;

use crate::types::{CapturedImage, Constraints};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use native::{NativeDevice, NativeStream};

/// Coarse failure kind already distinguished by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceErrorKind {
    PermissionRefused,
    DeviceNotFound,
    DeviceUnavailable,
    Other,
}

/// A failed acquisition.
///
/// `message` is the raw platform text. It is logged and used for
/// classification but never shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn permission_refused(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::PermissionRefused, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::DeviceNotFound, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::DeviceUnavailable, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Other, message)
    }
}

/// Failure to grab a still from a live stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera is not active")]
    NotActive,
    #[error("stream has been stopped")]
    StreamStopped,
    #[error("frame capture failed: {0}")]
    Backend(String),
    #[error("frame encoding failed: {0}")]
    Encoding(String),
}

/// Low-level capture backend.
///
/// `acquire` may suspend indefinitely (for example behind a permission
/// prompt). `stop` must be idempotent. Streams are cheap handles; clones
/// refer to the same underlying hardware stream.
#[async_trait]
pub trait CaptureDevice: Send + Sync + 'static {
    type Stream: Clone + Send + Sync + 'static;

    async fn acquire(&self, constraints: &Constraints) -> Result<Self::Stream, DeviceError>;

    fn stop(&self, stream: &Self::Stream);

    async fn capture_frame(&self, stream: &Self::Stream) -> Result<CapturedImage, CaptureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display_keeps_raw_message() {
        let err = DeviceError::unavailable("Could not start video source");
        assert_eq!(err.to_string(), "DeviceUnavailable: Could not start video source");
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&DeviceErrorKind::PermissionRefused).unwrap();
        assert_eq!(json, "\"permission-refused\"");
    }
}

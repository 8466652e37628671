//! Error classifier
//!
//! Maps a raw acquisition failure plus the current permission state onto a
//! single user-facing error kind and message.

use crate::device::{DeviceError, DeviceErrorKind};
use crate::permissions::PermissionState;
use serde::{Deserialize, Serialize};

/// User-facing error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InsecureContext,
    Unsupported,
    PermissionDenied,
    PermissionBlocked,
    NoDevice,
    DeviceBusy,
    StartupTimeout,
    StreamStartFailed,
    BlankPreview,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::InsecureContext,
        ErrorKind::Unsupported,
        ErrorKind::PermissionDenied,
        ErrorKind::PermissionBlocked,
        ErrorKind::NoDevice,
        ErrorKind::DeviceBusy,
        ErrorKind::StartupTimeout,
        ErrorKind::StreamStartFailed,
        ErrorKind::BlankPreview,
        ErrorKind::Unknown,
    ];

    /// Terminal kinds cannot be remedied from the capture surface.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::InsecureContext | ErrorKind::Unsupported)
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, ErrorKind::PermissionDenied | ErrorKind::PermissionBlocked)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InsecureContext => "insecure-context",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::PermissionBlocked => "permission-blocked",
            ErrorKind::NoDevice => "no-device",
            ErrorKind::DeviceBusy => "device-busy",
            ErrorKind::StartupTimeout => "startup-timeout",
            ErrorKind::StreamStartFailed => "stream-start-failed",
            ErrorKind::BlankPreview => "blank-preview",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// The complete message shown and announced for this kind
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::InsecureContext => {
                "Camera access requires a secure (HTTPS) connection. Open this page over HTTPS to use the camera."
            }
            ErrorKind::Unsupported => "Camera capture is not supported on this device or browser.",
            ErrorKind::PermissionDenied => {
                "Camera permission was denied. Tap Retry Camera Access and allow the camera when asked."
            }
            ErrorKind::PermissionBlocked => {
                "Camera access is blocked. Enable the camera for this site in your browser settings, then tap Retry Camera Access."
            }
            ErrorKind::NoDevice => "No camera was found on this device. Connect a camera and tap Retry Camera Access.",
            ErrorKind::DeviceBusy => {
                "The camera is in use by another app or unavailable. Close other apps using it and tap Retry Camera Access."
            }
            ErrorKind::StartupTimeout => "The camera took too long to start. Tap Retry Camera Access.",
            ErrorKind::StreamStartFailed => "The camera could not be started. Tap Retry Camera Access.",
            ErrorKind::BlankPreview => "The camera preview stayed blank. Tap Retry Camera Access.",
            ErrorKind::Unknown => "Something went wrong starting the camera. Tap Retry Camera Access.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure ready for presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.message().to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

const BUSY_SIGNATURES: &[&str] = &[
    "in use",
    "busy",
    "notreadable",
    "not readable",
    "could not start",
    "trackstart",
];

const TIMEOUT_SIGNATURES: &[&str] = &["timeout", "timed out", "time out"];

/// Classify a device failure given the permission state at the time of failure
pub fn classify(error: &DeviceError, permission: PermissionState) -> ClassifiedError {
    let kind = match error.kind {
        DeviceErrorKind::PermissionRefused if permission == PermissionState::Denied => {
            ErrorKind::PermissionBlocked
        }
        DeviceErrorKind::PermissionRefused => ErrorKind::PermissionDenied,
        DeviceErrorKind::DeviceNotFound => ErrorKind::NoDevice,
        DeviceErrorKind::DeviceUnavailable => ErrorKind::DeviceBusy,
        DeviceErrorKind::Other => classify_other(&error.message, permission),
    };

    ClassifiedError::new(kind)
}

fn classify_other(message: &str, permission: PermissionState) -> ErrorKind {
    let lower = message.to_lowercase();
    if BUSY_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        ErrorKind::DeviceBusy
    } else if TIMEOUT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        ErrorKind::StartupTimeout
    } else if permission == PermissionState::Granted {
        ErrorKind::StreamStartFailed
    } else {
        ErrorKind::Unknown
    }
}

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Platform the crate is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
    Unknown,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOS
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::MacOS => "macos",
            Platform::Linux => "linux",
            Platform::Unknown => "unknown",
        }
    }
}

/// Requested or decoded frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A frame only counts as decoded when both dimensions are non-zero.
    pub fn is_decoded(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Which camera to prefer on devices with more than one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    User,
    Environment,
}

/// Constraints handed to [`CaptureDevice::acquire`](crate::device::CaptureDevice::acquire)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    pub device_index: u32,
    pub resolution: Resolution,
    pub fps: u32,
    pub facing: FacingMode,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            device_index: 0,
            resolution: Resolution::new(1280, 720),
            fps: 30,
            facing: FacingMode::Environment,
        }
    }
}

/// An encoded still captured from a live stream
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    pub mime_type: &'static str,
}

impl CapturedImage {
    pub fn jpeg(bytes: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            bytes: bytes.into(),
            width,
            height,
            mime_type: "image/jpeg",
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

use thiserror::Error;

/// Infrastructure failures of the crate itself.
///
/// Acquisition failures are not reported through this type; they are
/// [`DeviceError`](crate::device::DeviceError)s that the session classifies.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Camera backend error: {0}")]
    BackendError(String),
    #[error("Session error: {0}")]
    SessionError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CameraError {
    pub fn config(msg: impl Into<String>) -> Self {
        CameraError::ConfigError(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        CameraError::BackendError(msg.into())
    }

    /// The session event loop has already shut down.
    pub fn session_closed() -> Self {
        CameraError::SessionError("session is closed".to_string())
    }
}

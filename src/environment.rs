//! Read-only environment checks run before every acquisition attempt.

/// Preconditions for camera capture on the current surface
pub trait EnvironmentProbe: Send + Sync + 'static {
    /// Served from a secure (HTTPS-equivalent) origin
    fn is_secure_context(&self) -> bool;

    /// The platform exposes a media-capture capability at all
    fn has_capture_capability(&self) -> bool;
}

/// Whether `origin` would be treated as potentially trustworthy by a browser.
///
/// `https`, `wss`, `file` and `tauri` schemes are secure, as are loopback
/// hosts over any scheme.
pub fn is_secure_origin(origin: &str) -> bool {
    let origin = origin.trim();
    let Some((scheme, rest)) = origin.split_once("://") else {
        return false;
    };

    match scheme.to_ascii_lowercase().as_str() {
        "https" | "wss" | "file" | "tauri" => return true,
        "http" | "ws" => {}
        _ => return false,
    }

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    let host = if authority.starts_with('[') {
        // IPv6 literal keeps its brackets; strip only the port.
        match authority.find(']') {
            Some(end) => &authority[..=end],
            None => return false,
        }
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    let host = host.to_ascii_lowercase();

    host == "localhost"
        || host.ends_with(".localhost")
        || host == "127.0.0.1"
        || host == "[::1]"
}

/// Environment of a native desktop process (optionally hosting a webview)
#[derive(Debug, Clone, Default)]
pub struct NativeEnvironment {
    origin: Option<String>,
}

impl NativeEnvironment {
    pub fn new(origin: Option<String>) -> Self {
        Self { origin }
    }
}

impl EnvironmentProbe for NativeEnvironment {
    fn is_secure_context(&self) -> bool {
        match &self.origin {
            Some(origin) => is_secure_origin(origin),
            None => true,
        }
    }

    fn has_capture_capability(&self) -> bool {
        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("No usable capture backend: {}", e);
                false
            }
        }
    }
}

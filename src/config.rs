//! Configuration management for livecam
//!
//! Provides loading, saving and validation of the session watchdog timings,
//! the camera constraints used for acquisition and the encoding used for
//! manual frame capture.

use crate::errors::CameraError;
use crate::types::{Constraints, FacingMode, Resolution};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivecamConfig {
    pub session: SessionConfig,
    pub camera: CameraConfig,
    pub capture: CaptureConfig,
}

/// Acquisition session timings and recovery policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time allowed for acquisition before the manual-start fallback is shown
    pub startup_timeout_ms: u64,
    /// Time allowed for the first decoded frame once a stream is live
    pub blank_preview_timeout_ms: u64,
    /// Restart a blank stream once before surfacing an error
    pub auto_restart_on_blank: bool,
    /// Resume a lost stream when the page becomes visible again
    pub resume_on_visible: bool,
    /// Origin the capture surface is served from. `None` for a native process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Camera constraints requested on every acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: u32,
    /// [width, height]
    pub resolution: [u32; 2],
    pub fps: u32,
    pub facing: FacingMode,
}

/// Manual frame capture encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: 3000,
            blank_preview_timeout_ms: 5000,
            auto_restart_on_blank: true,
            resume_on_visible: true,
            origin: None,
        }
    }
}

impl SessionConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn blank_preview_timeout(&self) -> Duration {
        Duration::from_millis(self.blank_preview_timeout_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            resolution: [1280, 720],
            fps: 30,
            facing: FacingMode::Environment,
        }
    }
}

impl CameraConfig {
    pub fn constraints(&self) -> Constraints {
        Constraints {
            device_index: self.device_index,
            resolution: Resolution::new(self.resolution[0], self.resolution[1]),
            fps: self.fps,
            facing: self.facing,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { jpeg_quality: 90 }
    }
}

impl Default for LivecamConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            camera: CameraConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl LivecamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CameraError::config(format!("Failed to read config file: {}", e)))?;

        let config: LivecamConfig = toml::from_str(&contents)
            .map_err(|e| CameraError::config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load defaults, then the optional TOML file, then `LIVECAM__*` environment overrides.
    ///
    /// `LIVECAM__SESSION__STARTUP_TIMEOUT_MS=4000` overrides `session.startup_timeout_ms`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, CameraError> {
        let defaults = config::Config::try_from(&Self::default())
            .map_err(|e| CameraError::config(format!("Failed to seed defaults: {}", e)))?;

        let layered = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("LIVECAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CameraError::config(format!("Failed to build config: {}", e)))?;

        let config: LivecamConfig = layered
            .try_deserialize()
            .map_err(|e| CameraError::config(format!("Failed to deserialize config: {}", e)))?;

        config.validate().map_err(CameraError::config)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CameraError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CameraError::config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CameraError::config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CameraError::config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("livecam.toml")
    }

    /// Layered load from `path`, or from [`LivecamConfig::default_path`] when none is given
    pub fn load(path: Option<&Path>) -> Result<Self, CameraError> {
        match path {
            Some(path) => Self::load_layered(path),
            None => Self::load_layered(Self::default_path()),
        }
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let timeouts = 100..=60_000;
        if !timeouts.contains(&self.session.startup_timeout_ms) {
            return Err("Startup timeout must be between 100 and 60000 ms".to_string());
        }
        if !timeouts.contains(&self.session.blank_preview_timeout_ms) {
            return Err("Blank preview timeout must be between 100 and 60000 ms".to_string());
        }

        if self.camera.resolution[0] == 0 || self.camera.resolution[1] == 0 {
            return Err("Invalid camera resolution".to_string());
        }
        if self.camera.fps == 0 || self.camera.fps > 240 {
            return Err("Invalid camera FPS (must be 1-240)".to_string());
        }

        if self.capture.jpeg_quality == 0 || self.capture.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }

        Ok(())
    }
}

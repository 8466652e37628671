//! Testing utilities for livecam
//!
//! Scriptable stand-ins for the capture device, permission source,
//! environment and announcer, so session behavior can be exercised offline
//! and under paused tokio time.

pub mod fakes;

pub use fakes::{
    wait_for_state, AcquireStep, RecordingAnnouncer, ScriptedDevice, ScriptedStream,
    StaticEnvironment, StaticPermissions,
};

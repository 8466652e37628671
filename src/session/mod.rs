//! Camera acquisition session
//!
//! [`SessionMachine`] holds every transition rule and is fully synchronous.
//! [`CameraSession`] runs it on tokio, executing its effects against a
//! [`CaptureDevice`](crate::device::CaptureDevice), a
//! [`PermissionOracle`](crate::permissions::PermissionOracle) and an
//! [`EnvironmentProbe`](crate::environment::EnvironmentProbe).

pub mod driver;
pub mod machine;
pub mod state;

pub use driver::{CameraSession, SessionBuilder};
pub use machine::{Effect, Generation, SessionEvent, SessionMachine, TimerKind, TimerToken, Visibility};
pub use state::{Politeness, SessionState, SessionStatus, View};

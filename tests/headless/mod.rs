//! Smoke tests against the real platform camera stack.
//!
//! These run without asserting that a camera exists; they only require that
//! probing never panics and that failures are classified.
//!
//! Run with: cargo test --test headless --features headless

#[cfg(feature = "headless")]
mod native_tests {
    use livecam::device::NativeDevice;
    use livecam::environment::{EnvironmentProbe, NativeEnvironment};
    use livecam::permissions::{check_permission, PermissionOracle};
    use livecam::session::{CameraSession, SessionState};
    use livecam::LivecamConfig;
    use std::time::Duration;

    #[test]
    fn test_capability_probe_no_panic() {
        let _ = NativeEnvironment::new(None).has_capture_capability();
    }

    #[test]
    fn test_permission_probe_no_panic() {
        let _ = check_permission();
    }

    #[tokio::test]
    async fn test_native_session_settles() {
        let config = LivecamConfig::default();
        let session = CameraSession::from_config(NativeDevice::new(90), &config)
            .permissions(PermissionOracle::native())
            .mount();
        let mut status = session.watch_status();

        // Whatever the machine has, it must leave the loading states.
        let settled = tokio::time::timeout(
            Duration::from_secs(10),
            status.wait_for(|s| {
                matches!(
                    s.state,
                    SessionState::Active | SessionState::Fallback | SessionState::Error
                )
            }),
        )
        .await
        .is_ok();
        assert!(settled, "session stuck in {}", session.status().state);

        session.unmount().await;
    }
}

//! Per-session timers: the idle checker and the resource sampler.
//!
//! Both tasks are owned by the session's cancellation token. They start when
//! the client reaches ready and stop the moment any teardown path cancels
//! the token, so a dead entry never keeps ticking.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info, warn};

use crate::lifecycle::LifecycleManager;
use crate::metric;
use crate::registry::SessionHandle;

/// Spawn the idle checker and resource sampler for a newly ready session.
/// Spawning twice on the same handle is a no-op.
pub fn start(manager: &Arc<LifecycleManager>, session: &Arc<SessionHandle>) {
    if !session.claim_timer_start() {
        return;
    }
    spawn_idle_checker(Arc::clone(manager), Arc::clone(session));
    spawn_resource_sampler(Arc::clone(manager), Arc::clone(session));
}

/// Evicts the session once it has been idle past the inactivity window. The
/// eviction preserves the durable record, so the account resumes later
/// without re-pairing.
fn spawn_idle_checker(manager: Arc<LifecycleManager>, session: Arc<SessionHandle>) {
    let _ = tokio::spawn(async move {
        let check_interval = manager.config().idle_check_interval;
        let timeout = manager.config().inactivity_timeout;
        loop {
            tokio::select! {
                () = session.timers().cancelled() => break,
                () = tokio::time::sleep(check_interval) => {}
            }
            let idle = session.idle_for();
            if idle < timeout {
                debug!(
                    account = %session.id().joined(),
                    idle_secs = idle.as_secs(),
                    "idle check passed"
                );
                continue;
            }
            info!(
                account = %session.id().joined(),
                idle_secs = idle.as_secs(),
                "evicting idle session"
            );
            counter!(metric::SESSIONS_EVICTED, "reason" => "idle").increment(1);
            if let Err(err) = manager
                .disconnect_preserving_session(session.id())
                .await
            {
                warn!(account = %session.id().joined(), error = %err, "idle eviction failed");
            }
            break;
        }
    });
}

/// Periodic visibility into how each session behaves between idle checks.
fn spawn_resource_sampler(manager: Arc<LifecycleManager>, session: Arc<SessionHandle>) {
    let _ = tokio::spawn(async move {
        let interval = manager.config().resource_log_interval;
        loop {
            tokio::select! {
                () = session.timers().cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            info!(
                account = %session.id().joined(),
                state = ?session.state(),
                idle_secs = session.idle_for().as_secs(),
                "session resource sample"
            );
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::driver::mock::{MockDriver, MockDriverFactory, StartScript};
    use courier_core::{AccountId, SessionState};
    use courier_store::open_memory_pool;
    use std::time::Duration;

    async fn connected_manager(config: GatewayConfig, id: &AccountId) -> Arc<LifecycleManager> {
        let factory = MockDriverFactory::new();
        let driver = MockDriver::new();
        driver.script_start(StartScript::pairing("qr", "5215512345678"));
        factory.preload(id, driver);
        let manager = LifecycleManager::new(open_memory_pool().unwrap(), factory, None, config);
        manager.initialize(id, None).await.unwrap();
        for _ in 0..200 {
            if let Some(session) = manager.registry().get(id).await {
                if session.state() == SessionState::Connected {
                    return manager;
                }
            }
            tokio::task::yield_now().await;
        }
        panic!("session never connected");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_evicted_after_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            artifact_root: dir.path().to_path_buf(),
            inactivity_timeout: Duration::from_secs(100),
            idle_check_interval: Duration::from_secs(10),
            ..GatewayConfig::default()
        };
        let id = AccountId::new("wa", "alice");
        let manager = connected_manager(config, &id).await;

        tokio::time::sleep(Duration::from_secs(150)).await;
        for _ in 0..200 {
            if manager.registry().get(&id).await.is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(manager.registry().get(&id).await.is_none());

        // Preserved record: the account can come back without a fresh QR.
        let status = manager.check_connection(&id).await.unwrap();
        assert_eq!(status.state, SessionState::AutoDisconnected);
        assert!(status.can_reconnect);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_the_idle_clock() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            artifact_root: dir.path().to_path_buf(),
            inactivity_timeout: Duration::from_secs(100),
            idle_check_interval: Duration::from_secs(10),
            ..GatewayConfig::default()
        };
        let id = AccountId::new("wa", "alice");
        let manager = connected_manager(config, &id).await;

        // Keep touching inside the window; the session must survive well past
        // a single timeout span.
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(60)).await;
            manager.send_message(&id, "14155550100", "ping").await.unwrap();
        }
        assert!(manager.registry().get(&id).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timers_do_not_evict() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            artifact_root: dir.path().to_path_buf(),
            inactivity_timeout: Duration::from_secs(100),
            idle_check_interval: Duration::from_secs(10),
            ..GatewayConfig::default()
        };
        let id = AccountId::new("wa", "alice");
        let manager = connected_manager(config, &id).await;

        // Explicit disconnect cancels the timers with the session.
        manager.disconnect_and_wipe(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(500)).await;

        let status = manager.check_connection(&id).await.unwrap();
        assert_eq!(status.state, SessionState::Disconnected);
    }

    #[tokio::test]
    async fn timer_start_claim_is_single_shot() {
        let session = crate::registry::SessionHandle::new(
            AccountId::new("wa", "alice"),
            MockDriver::new(),
        );
        assert!(session.claim_timer_start());
        assert!(!session.claim_timer_start());
    }
}

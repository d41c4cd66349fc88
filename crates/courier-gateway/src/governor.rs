//! Process-wide resource governor.
//!
//! Two background loops: a memory watcher that evicts the least-recently
//! active sessions when resident memory crosses the pressure threshold, and a
//! disk watcher that logs how much the artifact root has grown. Both stop on
//! the shutdown token.

use std::path::Path;
use std::sync::Arc;

use metrics::{counter, gauge};
use sysinfo::{ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lifecycle::LifecycleManager;
use crate::metric;

/// Resident memory of this process, in bytes. Returns 0 when the pid cannot
/// be resolved.
#[must_use]
pub fn current_process_memory_bytes() -> u64 {
    let mut system = System::new();
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
    system.process(pid).map_or(0, sysinfo::Process::memory)
}

/// Total size, in bytes, of everything under `path`. Unreadable entries are
/// skipped rather than failing the walk.
#[must_use]
pub fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += metadata.len();
        }
    }
    total
}

/// Apply the eviction policy for one memory sample. Returns how many
/// sessions were evicted.
pub async fn enforce(manager: &Arc<LifecycleManager>, used_bytes: u64) -> usize {
    let threshold = manager.config().pressure_threshold_bytes();
    if used_bytes < threshold {
        return 0;
    }
    let live = manager.registry().count().await;
    if live == 0 {
        warn!(
            used_bytes,
            threshold, "memory pressure with no live sessions to evict"
        );
        return 0;
    }

    let victims = manager
        .registry()
        .least_recently_active(manager.config().evictions_per_episode.min(live))
        .await;
    warn!(
        used_bytes,
        threshold,
        victims = victims.len(),
        "memory pressure, evicting least-recently-active sessions"
    );

    let mut evicted = 0;
    for session in victims {
        let id = session.id().clone();
        info!(
            account = %id.joined(),
            idle_secs = session.idle_for().as_secs(),
            "evicting session under memory pressure"
        );
        counter!(metric::SESSIONS_EVICTED, "reason" => "memory").increment(1);
        match manager.disconnect_preserving_session(&id).await {
            Ok(_) => evicted += 1,
            Err(err) => {
                warn!(account = %id.joined(), error = %err, "pressure eviction failed");
            }
        }
    }
    evicted
}

/// Spawn the memory and disk watchers. They run until `shutdown` is
/// cancelled.
pub fn spawn(manager: Arc<LifecycleManager>, shutdown: CancellationToken) {
    spawn_memory_watcher(Arc::clone(&manager), shutdown.clone());
    spawn_disk_watcher(manager, shutdown);
}

fn spawn_memory_watcher(manager: Arc<LifecycleManager>, shutdown: CancellationToken) {
    let _ = tokio::spawn(async move {
        let interval = manager.config().memory_check_interval;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            let used = current_process_memory_bytes();
            gauge!(metric::PROCESS_MEMORY_BYTES).set(used as f64);
            debug!(used_bytes = used, "memory sample");
            let _ = enforce(&manager, used).await;
        }
    });
}

fn spawn_disk_watcher(manager: Arc<LifecycleManager>, shutdown: CancellationToken) {
    let _ = tokio::spawn(async move {
        let interval = manager.config().disk_check_interval;
        let root = manager.config().artifact_root.clone();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
            let root = root.clone();
            let size = match tokio::task::spawn_blocking(move || dir_size(&root)).await {
                Ok(size) => size,
                Err(err) => {
                    warn!(error = %err, "disk usage walk panicked");
                    continue;
                }
            };
            let sessions = manager.registry().count().await;
            info!(
                artifact_bytes = size,
                sessions,
                "artifact disk usage"
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

    async fn manager_with_sessions(
        dir: &std::path::Path,
        names: &[&str],
    ) -> Arc<LifecycleManager> {
        let factory = MockDriverFactory::new();
        let config = GatewayConfig {
            artifact_root: dir.to_path_buf(),
            heap_ceiling_bytes: 1_000,
            pressure_ratio: 0.8,
            evictions_per_episode: 2,
            ..GatewayConfig::default()
        };
        let manager = LifecycleManager::new(open_memory_pool().unwrap(), factory.clone(), None, config);
        for name in names {
            let id = AccountId::new("wa", *name);
            let driver = MockDriver::new();
            driver.script_start(StartScript::pairing("qr", "5215512345678"));
            factory.preload(&id, driver);
            manager.initialize(&id, None).await.unwrap();
            'wait: for _ in 0..200 {
                if let Some(session) = manager.registry().get(&id).await {
                    if session.state() == SessionState::Connected {
                        break 'wait;
                    }
                }
                tokio::task::yield_now().await;
            }
        }
        manager
    }

    #[tokio::test]
    async fn below_threshold_evicts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_sessions(dir.path(), &["alice", "bob"]).await;
        assert_eq!(enforce(&manager, 700).await, 0);
        assert_eq!(manager.registry().count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pressure_evicts_least_recently_active_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_sessions(dir.path(), &["alice", "bob", "carol"]).await;

        // Make alice the coldest, carol the hottest.
        for name in ["alice", "bob", "carol"] {
            tokio::time::advance(Duration::from_secs(60)).await;
            manager
                .registry()
                .get(&AccountId::new("wa", name))
                .await
                .unwrap()
                .touch();
        }

        let evicted = enforce(&manager, 900).await;
        assert_eq!(evicted, 2);
        assert!(manager.registry().get(&AccountId::new("wa", "alice")).await.is_none());
        assert!(manager.registry().get(&AccountId::new("wa", "bob")).await.is_none());
        assert!(manager.registry().get(&AccountId::new("wa", "carol")).await.is_some());

        // Evicted sessions keep their records, so they can resume.
        let status = manager
            .check_connection(&AccountId::new("wa", "alice"))
            .await
            .unwrap();
        assert!(status.can_reconnect);
    }

    #[tokio::test]
    async fn eviction_is_bounded_by_live_count() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_sessions(dir.path(), &["alice"]).await;
        assert_eq!(enforce(&manager, 900).await, 1);
        assert_eq!(manager.registry().count().await, 0);
        assert_eq!(enforce(&manager, 900).await, 0);
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 100]).unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("b.bin"), vec![0u8; 250]).unwrap();
        assert_eq!(dir_size(dir.path()), 350);

        assert_eq!(dir_size(&dir.path().join("missing")), 0);
    }

    #[test]
    fn memory_sample_is_nonzero_for_this_process() {
        assert!(current_process_memory_bytes() > 0);
    }
}

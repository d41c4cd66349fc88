//! Live-session registry.
//!
//! The single source of truth for "who is connected right now". Sessions own
//! their timers through a [`CancellationToken`]; every removal path must
//! cancel it, otherwise idle and sampling tasks keep ticking against a dead
//! entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use courier_core::{AccountId, SessionState};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::driver::MessagingDriver;

/// One live client and its lifecycle metadata.
pub struct SessionHandle {
    id: AccountId,
    driver: Arc<dyn MessagingDriver>,
    state: Mutex<SessionState>,
    phone_number: Mutex<Option<String>>,
    last_activity: Mutex<Instant>,
    qr_emitted: AtomicBool,
    timers_started: AtomicBool,
    timers: CancellationToken,
}

impl SessionHandle {
    #[must_use]
    pub fn new(id: AccountId, driver: Arc<dyn MessagingDriver>) -> Arc<Self> {
        Arc::new(Self {
            id,
            driver,
            state: Mutex::new(SessionState::Uninitialized),
            phone_number: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            qr_emitted: AtomicBool::new(false),
            timers_started: AtomicBool::new(false),
            timers: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &AccountId {
        &self.id
    }

    #[must_use]
    pub fn driver(&self) -> &Arc<dyn MessagingDriver> {
        &self.driver
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `next`, returning whether the transition was legal. Illegal
    /// transitions are applied anyway (the driver is authoritative) but
    /// logged.
    pub fn set_state(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        let legal = state.can_transition_to(next);
        if !legal && *state != next {
            warn!(
                account = %self.id.joined(),
                from = ?*state,
                to = ?next,
                "unexpected state transition"
            );
        }
        *state = next;
        legal
    }

    #[must_use]
    pub fn phone_number(&self) -> Option<String> {
        self.phone_number.lock().clone()
    }

    pub fn set_phone_number(&self, number: impl Into<String>) {
        *self.phone_number.lock() = Some(number.into());
    }

    /// Refresh the last-activity timestamp.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// How long this session has been idle.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Claim the one QR emission for the current awaiting-QR episode.
    /// Returns true only for the first caller since the last reset.
    pub fn claim_qr_emission(&self) -> bool {
        !self.qr_emitted.swap(true, Ordering::Relaxed)
    }

    /// Re-arm QR emission after a driver restart.
    pub fn reset_qr_emission(&self) {
        self.qr_emitted.store(false, Ordering::Relaxed);
    }

    /// Claim the right to spawn this session's timer tasks. A driver restart
    /// re-emits the ready event on the same handle; only the first claim
    /// spawns.
    pub fn claim_timer_start(&self) -> bool {
        !self.timers_started.swap(true, Ordering::Relaxed)
    }

    /// Token owning the idle checker and resource sampler for this session.
    #[must_use]
    pub fn timers(&self) -> &CancellationToken {
        &self.timers
    }
}

/// In-memory map from account identity to live session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<AccountId, Arc<SessionHandle>>>,
    admission: DashMap<AccountId, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &AccountId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &AccountId) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Insert, returning any displaced session.
    pub async fn insert(
        &self,
        id: AccountId,
        session: Arc<SessionHandle>,
    ) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.insert(id, session)
    }

    pub async fn remove(&self, id: &AccountId) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(id)
    }

    /// Remove only if the registered session is exactly `expected`.
    ///
    /// Cleanup paths race (driver disconnect vs explicit disconnect vs a
    /// replacing initialize); this keeps cleanup idempotent per instance.
    pub async fn remove_if_same(&self, id: &AccountId, expected: &Arc<SessionHandle>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                let _ = sessions.remove(id);
                true
            }
            _ => false,
        }
    }

    pub async fn list(&self) -> Vec<(AccountId, Arc<SessionHandle>)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), session.clone()))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// The `n` least-recently-active sessions, oldest first.
    pub async fn least_recently_active(&self, n: usize) -> Vec<Arc<SessionHandle>> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.last_activity());
        sessions.truncate(n);
        sessions
    }

    /// Per-id admission mutex serializing teardown-then-create sequences.
    #[must_use]
    pub fn admission_lock(&self, id: &AccountId) -> Arc<tokio::sync::Mutex<()>> {
        self.admission
            .entry(id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

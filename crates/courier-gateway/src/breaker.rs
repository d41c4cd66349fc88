//! Per-endpoint circuit breakers.
//!
//! One breaker per logical downstream call category, created lazily by name.
//! While open, calls are rejected immediately with the scheduled retry time;
//! after the reset window a single half-open trial is admitted, and its
//! outcome decides whether the circuit closes again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::GatewayError;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Breaker thresholds.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub max_failures: u32,
    /// How long the circuit stays open before a half-open trial.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Observable breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow through; failures are counted.
    Closed,
    /// Calls are rejected until the reset window elapses.
    Open,
    /// One trial call is in flight.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<DateTime<Utc>>,
    next_attempt: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// Failure-tracking gate in front of one downstream endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                next_attempt: None,
                trial_in_flight: false,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Run `op` through the breaker.
    ///
    /// Rejection and the operation's own error share the same error type, so
    /// callers match on [`GatewayError::CircuitOpen`] to distinguish them.
    pub async fn execute<T, F>(&self, op: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        self.admit()?;
        match op.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }

    /// Admission check; transitions `Open -> HalfOpen` when the reset window
    /// has elapsed and admits exactly one trial.
    fn admit(&self) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => {
                // A trial is already in flight; reject until it resolves.
                Err(GatewayError::CircuitOpen {
                    name: self.name.clone(),
                    retry_at: inner.next_attempt.unwrap_or_else(Utc::now),
                })
            }
            BreakerState::Open => {
                let retry_at = inner.next_attempt.unwrap_or_else(Utc::now);
                if Utc::now() > retry_at {
                    debug!(breaker = %self.name, "half-open trial admitted");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(GatewayError::CircuitOpen {
                        name: self.name.clone(),
                        retry_at,
                    })
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            debug!(breaker = %self.name, "circuit closed");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.next_attempt = None;
        inner.trial_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Utc::now());
        let half_open_trial_failed = inner.state == BreakerState::HalfOpen;
        if half_open_trial_failed || inner.failure_count >= self.config.max_failures {
            let retry_at = Utc::now()
                + chrono::Duration::from_std(self.config.reset_timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                %retry_at,
                "circuit opened"
            );
            inner.state = BreakerState::Open;
            inner.next_attempt = Some(retry_at);
            inner.trial_in_flight = false;
        }
    }
}

/// Lazily-populated collection of breakers, keyed by endpoint name.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// Fetch the breaker for `name`, creating it on first use.
    #[must_use]
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config)))
            .clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test-endpoint",
            BreakerConfig {
                max_failures: 3,
                reset_timeout: Duration::from_millis(50),
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), GatewayError> {
        b.execute(async { Err::<(), _>(GatewayError::Driver("boom".into())) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), GatewayError> {
        b.execute(async { Ok(()) }).await
    }

    #[tokio::test]
    async fn stays_closed_below_threshold() {
        let b = fast_breaker();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 2);
    }

    #[tokio::test]
    async fn opens_after_max_failures() {
        let b = fast_breaker();
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Open);

        let err = succeed(&b).await.unwrap_err();
        assert_matches!(err, GatewayError::CircuitOpen { .. });
        assert_eq!(err.code(), "circuit_open");
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let b = fast_breaker();
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        succeed(&b).await.unwrap();
        assert_eq!(b.failure_count(), 0);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_trial_success_closes() {
        let b = fast_breaker();
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test]
    async fn half_open_trial_failure_reopens() {
        let b = fast_breaker();
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        // Re-opened: next call rejected again.
        let err = succeed(&b).await.unwrap_err();
        assert_matches!(err, GatewayError::CircuitOpen { .. });
    }

    #[tokio::test]
    async fn exactly_one_half_open_trial() {
        let b = Arc::new(fast_breaker());
        for _ in 0..3 {
            let _ = fail(&b).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        // First call enters the trial and holds it in flight; a concurrent
        // call must be rejected while the trial is unresolved.
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let b = b.clone();
            tokio::spawn(async move {
                b.execute(async {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    Ok(())
                })
                .await
            })
        };
        started_rx.await.unwrap();

        let err = succeed(&b).await.unwrap_err();
        assert_matches!(err, GatewayError::CircuitOpen { .. });

        let _ = release_tx.send(());
        trial.await.unwrap().unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn registry_creates_lazily_and_reuses() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.breaker("assistant-api");
        let b = registry.breaker("assistant-api");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "assistant-api");

        let other = registry.breaker("media-download");
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[tokio::test]
    async fn open_error_carries_future_retry_hint() {
        let b = CircuitBreaker::new(
            "hint",
            BreakerConfig {
                max_failures: 1,
                reset_timeout: Duration::from_secs(30),
            },
        );
        let _ = fail(&b).await;
        match succeed(&b).await.unwrap_err() {
            GatewayError::CircuitOpen { retry_at, .. } => assert!(retry_at > Utc::now()),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }
}

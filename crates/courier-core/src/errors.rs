//! Gateway error taxonomy.
//!
//! Every failure a command handler can surface maps to one variant here.
//! Handlers convert errors to structured payloads; nothing in the gateway is
//! allowed to crash the process. The wire `code()` strings are stable — the
//! dashboard keys retry behavior off them.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed request parameters. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No live, ready client for the account. Caller should re-initialize.
    #[error("client for {account} is not connected")]
    NotReady {
        /// Joined `username-account_type` rendering.
        account: String,
    },

    /// An operation exceeded its bound. Distinct from permanent failure so
    /// callers may retry.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Human-readable operation label.
        operation: String,
        /// The bound that fired.
        seconds: u64,
    },

    /// Downstream dependency is degraded; the named breaker is open.
    #[error("circuit {name} is open until {retry_at}")]
    CircuitOpen {
        /// Breaker name (one per downstream call category).
        name: String,
        /// When the next trial call is allowed.
        retry_at: DateTime<Utc>,
    },

    /// Admission rejected: the concurrent-session cap is reached.
    #[error("connection limit of {max} concurrent sessions reached")]
    ConnectionLimit {
        /// Configured cap.
        max: usize,
    },

    /// The driver failed to start; any partial registry state was rolled
    /// back.
    #[error("client initialization failed: {cause}")]
    InitializationFailed {
        /// Underlying cause.
        cause: String,
    },

    /// Authentication failed and the bounded retries were exhausted; the
    /// local artifact has been wiped.
    #[error("authentication failed for {account} after {attempts} attempts")]
    AuthFailure {
        /// Joined account rendering.
        account: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// No durable record exists for the account.
    #[error("no session found for {account}")]
    SessionNotFound {
        /// Joined account rendering.
        account: String,
    },

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(String),

    /// Driver-level failure that is none of the above.
    #[error("driver error: {0}")]
    Driver(String),

    /// Filesystem failure on the local session artifact.
    #[error("artifact io error: {0}")]
    ArtifactIo(#[from] std::io::Error),
}

impl GatewayError {
    /// Stable wire code for structured error payloads.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotReady { .. } => "not_connected",
            Self::Timeout { .. } => "error_timeout",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::ConnectionLimit { .. } => "connection_limit_reached",
            Self::InitializationFailed { .. } => "initialization_failed",
            Self::AuthFailure { .. } => "auth_failure",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::Store(_) => "store_error",
            Self::Driver(_) => "driver_error",
            Self::ArtifactIo(_) => "artifact_io_error",
        }
    }

    /// Whether the caller may reasonably retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::CircuitOpen { .. } | Self::ConnectionLimit { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Per-client session lifecycle states.
//!
//! The driver emits a small closed set of signals (qr, authenticated, ready,
//! disconnected, auth failure); this module captures the states those
//! signals move a session through and which transitions are legal.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one managed client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Created but the driver has not started yet.
    Uninitialized,
    /// Driver is up and waiting for the pairing QR to be scanned.
    AwaitingQr,
    /// QR scanned; credential exchange in progress.
    Authenticating,
    /// Resuming from a stored artifact, no QR needed.
    Connecting,
    /// Fully connected; phone identity assigned.
    Connected,
    /// Evicted by the idle or memory governor; durable record preserved.
    AutoDisconnected,
    /// Terminal: driver reported disconnection or an explicit disconnect ran.
    Disconnected,
    /// Terminal: initialization or authentication failed permanently.
    Error,
}

impl SessionState {
    /// Whether the session has a live driver that can service sends.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::AwaitingQr | Self::Authenticating | Self::Connecting | Self::Connected
        )
    }

    /// Whether this state ends the client instance.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    /// Whether `next` is a legal transition from `self`.
    ///
    /// Auth failure can strike from any live state, so every live state may
    /// move to `Error`. `Disconnected` can likewise arrive at any point once
    /// the driver is up.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            Authenticating, AutoDisconnected, AwaitingQr, Connected, Connecting, Disconnected,
            Error, Uninitialized,
        };
        match self {
            Uninitialized => matches!(next, AwaitingQr | Connecting | Error),
            AwaitingQr => matches!(next, Authenticating | Disconnected | Error),
            Authenticating | Connecting => matches!(next, Connected | Disconnected | Error),
            Connected => matches!(next, AutoDisconnected | Disconnected | Error),
            AutoDisconnected => matches!(next, Connecting | Disconnected),
            Disconnected | Error => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

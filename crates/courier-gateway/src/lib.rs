//! Session lifecycle core.
//!
//! One managed connection per `(account_type, username)` pair, each backed by
//! a browser-automation driver. The modules compose leaf-first:
//!
//! | Module      | Responsibility                                             |
//! |-------------|------------------------------------------------------------|
//! | `breaker`   | Per-endpoint circuit breakers guarding downstream calls    |
//! | `driver`    | Client driver trait, event signals, bridge + mock drivers  |
//! | `qr`        | Pairing payload rendering (inline SVG data URL)            |
//! | `registry`  | Live-session map, the source of truth for "connected now"  |
//! | `phone`     | Recipient number validation                                |
//! | `reconcile` | Artifact/record reconciliation and orphan cleanup          |
//! | `activity`  | Per-session idle timer and resource-usage sampler          |
//! | `assistant` | Auto-reply calls with breaker, timeout, and fallbacks      |
//! | `batch`     | Jittered batch dispatch with per-item outcomes             |
//! | `lifecycle` | Orchestration: initialize, reconnect, teardown, dispatch   |
//! | `governor`  | Process-wide memory pressure eviction and disk sampling    |

pub mod activity;
pub mod assistant;
pub mod batch;
pub mod breaker;
pub mod config;
pub mod driver;
pub mod governor;
pub mod lifecycle;
pub mod phone;
pub mod qr;
pub mod reconcile;
pub mod registry;

pub use assistant::AssistantClient;
pub use batch::{BatchItem, BatchOutcome, BatchReport, BatchSender, JitterPacer, NoopPacer, Pacer};
pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use config::GatewayConfig;
pub use driver::{ClientEvent, DriverConfig, DriverFactory, MessagingDriver};
pub use lifecycle::{ConnectionStatus, InitOutcome, LifecycleManager, QrCallback, TeardownOutcome};
pub use registry::{SessionHandle, SessionRegistry};

/// Metric names emitted by this crate.
pub mod metric {
    /// Counter: sessions successfully started.
    pub const SESSIONS_INITIALIZED: &str = "courier_sessions_initialized_total";
    /// Counter: sessions evicted (idle or memory pressure), labeled `reason`.
    pub const SESSIONS_EVICTED: &str = "courier_sessions_evicted_total";
    /// Counter: outbound messages handed to a driver.
    pub const MESSAGES_SENT: &str = "courier_messages_sent_total";
    /// Counter: assistant replies that fell back to a canned response.
    pub const ASSISTANT_FALLBACKS: &str = "courier_assistant_fallbacks_total";
    /// Gauge: live sessions in the registry.
    pub const SESSIONS_LIVE: &str = "courier_sessions_live";
    /// Gauge: last sampled process memory, bytes.
    pub const PROCESS_MEMORY_BYTES: &str = "courier_process_memory_bytes";
}

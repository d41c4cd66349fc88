//! Tunables for the lifecycle core.
//!
//! Defaults mirror production operation: generous idle windows (sessions are
//! long-lived), short bounds on anything network-facing.

use std::path::PathBuf;
use std::time::Duration;

use courier_core::retry::RetryPolicy;

/// Configuration shared by the lifecycle manager, activity tracker, and
/// resource governor.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Root directory holding one artifact subdirectory per joined id.
    pub artifact_root: PathBuf,
    /// Admission cap on concurrently live clients.
    pub max_concurrent_clients: usize,
    /// Idle window after which a session is evicted (record preserved).
    pub inactivity_timeout: Duration,
    /// How often each session checks its own idleness.
    pub idle_check_interval: Duration,
    /// How often each session logs its resource usage.
    pub resource_log_interval: Duration,
    /// How often the governor samples process memory.
    pub memory_check_interval: Duration,
    /// Heap ceiling; pressure is measured against `pressure_ratio` of this.
    pub heap_ceiling_bytes: u64,
    /// Fraction of the ceiling that triggers eviction.
    pub pressure_ratio: f64,
    /// Sessions evicted per pressure episode (bounded by live count).
    pub evictions_per_episode: usize,
    /// How often the governor walks the artifact root for disk usage.
    pub disk_check_interval: Duration,
    /// Bound on a single text send.
    pub send_timeout: Duration,
    /// Bound on a media send (covers the download).
    pub media_timeout: Duration,
    /// Bound on group create/invite calls.
    pub group_timeout: Duration,
    /// Bound on the durable-record delete during disconnect cleanup.
    pub record_delete_timeout: Duration,
    /// Bound on one assistant-service call.
    pub assistant_timeout: Duration,
    /// Backoff policy for driver auth-failure restarts.
    pub auth_retry: RetryPolicy,
    /// Run drivers without a visible browser window.
    pub headless: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from(".courier/sessions"),
            max_concurrent_clients: 10,
            inactivity_timeout: Duration::from_secs(48 * 60 * 60),
            idle_check_interval: Duration::from_secs(60 * 60),
            resource_log_interval: Duration::from_secs(30 * 60),
            memory_check_interval: Duration::from_secs(15 * 60),
            heap_ceiling_bytes: 512 * 1024 * 1024,
            pressure_ratio: 0.8,
            evictions_per_episode: 2,
            disk_check_interval: Duration::from_secs(60 * 60),
            send_timeout: Duration::from_secs(10),
            media_timeout: Duration::from_secs(15),
            group_timeout: Duration::from_secs(15),
            record_delete_timeout: Duration::from_secs(5),
            assistant_timeout: Duration::from_secs(10),
            auth_retry: RetryPolicy::default(),
            headless: true,
        }
    }
}

impl GatewayConfig {
    /// Memory level (bytes) above which the governor evicts.
    #[must_use]
    pub fn pressure_threshold_bytes(&self) -> u64 {
        (self.heap_ceiling_bytes as f64 * self.pressure_ratio) as u64
    }
}

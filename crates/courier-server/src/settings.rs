//! Layered settings: compiled defaults, then a JSON file, then environment
//! variables.
//!
//! Loading flow:
//! 1. Start with [`Settings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `COURIER_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects merge recursively (source overrides target per key)
//! - Arrays and primitives are replaced by the source value
//! - Nulls in the source are skipped, preserving the target

use std::path::{Path, PathBuf};
use std::time::Duration;

use courier_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ServerError;

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (0 for auto-assign).
    pub port: u16,
    /// Cap on concurrently connected WebSocket clients.
    pub max_ws_clients: usize,
    /// Server ping cadence, seconds.
    pub heartbeat_interval_secs: u64,
    /// A connection that sends nothing for this long is closed, seconds.
    pub ws_inactivity_timeout_secs: u64,
    /// Max inbound WebSocket frame size, bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_ws_clients: 50,
            heartbeat_interval_secs: 30,
            ws_inactivity_timeout_secs: 600,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Session-gateway settings that feed [`GatewayConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Root directory for per-account client artifacts.
    pub artifact_root: PathBuf,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Admission cap on live clients.
    pub max_concurrent_clients: usize,
    /// Heap ceiling for the memory governor, MiB.
    pub heap_ceiling_mb: u64,
    /// Run browser drivers without a visible window.
    pub headless: bool,
    /// Bridge driver executable.
    pub bridge_command: PathBuf,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        let base = PathBuf::from(home).join(".courier");
        Self {
            artifact_root: base.join("sessions"),
            db_path: base.join("courier.db"),
            max_concurrent_clients: 10,
            heap_ceiling_mb: 512,
            headless: true,
            bridge_command: PathBuf::from("courier-bridge"),
        }
    }
}

/// Identity-token verification settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret for command tokens. Unset disables verification.
    pub jwt_secret: Option<String>,
}

/// Assistant auto-reply service settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantSettings {
    /// Base URL of the reply service. Unset disables auto-reply.
    pub url: Option<String>,
}

/// The account the plain HTTP surface is bound to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefaultSessionSettings {
    pub account_type: String,
    pub username: String,
}

impl Default for DefaultSessionSettings {
    fn default() -> Self {
        Self {
            account_type: "wa".into(),
            username: "default".into(),
        }
    }
}

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub server: ServerSettings,
    pub gateway: GatewaySettings,
    pub auth: AuthSettings,
    pub assistant: AssistantSettings,
    pub default_session: DefaultSessionSettings,
}

impl Settings {
    /// Project the gateway section onto the lifecycle manager's config.
    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            artifact_root: self.gateway.artifact_root.clone(),
            max_concurrent_clients: self.gateway.max_concurrent_clients,
            heap_ceiling_bytes: self.gateway.heap_ceiling_mb * 1024 * 1024,
            headless: self.gateway.headless,
            ..GatewayConfig::default()
        }
    }

    /// Ping cadence as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.server.heartbeat_interval_secs)
    }

    /// Connection inactivity bound as a [`Duration`].
    #[must_use]
    pub fn ws_inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.server.ws_inactivity_timeout_secs)
    }
}

/// Resolve the default settings file path (`~/.courier/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".courier").join("settings.json")
}

/// Load settings from a specific path with env overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_from_path(path: &Path) -> Result<Settings, ServerError> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `COURIER_*` environment overrides.
///
/// Integers must parse and fall within range; invalid values are ignored
/// with a warning so a typo cannot take the gateway down.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(v) = read_env_string("COURIER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("COURIER_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("COURIER_MAX_WS_CLIENTS", 1, 10_000) {
        settings.server.max_ws_clients = v;
    }
    if let Some(v) = read_env_u64("COURIER_HEARTBEAT_SECS", 1, 3_600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_env_u64("COURIER_WS_IDLE_SECS", 1, 86_400) {
        settings.server.ws_inactivity_timeout_secs = v;
    }

    if let Some(v) = read_env_string("COURIER_ARTIFACT_ROOT") {
        settings.gateway.artifact_root = PathBuf::from(v);
    }
    if let Some(v) = read_env_string("COURIER_DB_PATH") {
        settings.gateway.db_path = PathBuf::from(v);
    }
    if let Some(v) = read_env_usize("COURIER_MAX_CLIENTS", 1, 1_000) {
        settings.gateway.max_concurrent_clients = v;
    }
    if let Some(v) = read_env_u64("COURIER_HEAP_CEILING_MB", 64, 65_536) {
        settings.gateway.heap_ceiling_mb = v;
    }
    if let Some(v) = read_env_bool("COURIER_HEADLESS") {
        settings.gateway.headless = v;
    }
    if let Some(v) = read_env_string("COURIER_BRIDGE_COMMAND") {
        settings.gateway.bridge_command = PathBuf::from(v);
    }

    if let Some(v) = read_env_string("COURIER_JWT_SECRET") {
        settings.auth.jwt_secret = Some(v);
    }
    if let Some(v) = read_env_string("COURIER_ASSISTANT_URL") {
        settings.assistant.url = Some(v);
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

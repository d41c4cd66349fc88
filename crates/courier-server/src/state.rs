//! Shared state accessible from every Axum handler.

use std::sync::Arc;
use std::time::Instant;

use courier_gateway::{BatchSender, LifecycleManager};
use courier_store::StorePool;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;

use crate::auth::TokenVerifier;
use crate::settings::Settings;
use crate::shutdown::ShutdownCoordinator;
use crate::ws::connection::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    /// Session lifecycle orchestrator.
    pub manager: Arc<LifecycleManager>,
    /// Jittered batch dispatcher.
    pub batch: Arc<BatchSender>,
    /// Store pool for command handlers that read/write rows directly.
    pub pool: StorePool,
    pub settings: Arc<Settings>,
    pub verifier: TokenVerifier,
    /// Connected WebSocket command clients.
    pub connections: Arc<ConnectionRegistry>,
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    pub start_time: Instant,
    /// Most recent QR data URL, served by `GET /wa/qr`.
    pub last_qr: Arc<Mutex<Option<String>>>,
}

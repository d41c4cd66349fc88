//! Router assembly and the listen loop.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ServerError;
use crate::http;
use crate::state::AppState;
use crate::ws;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(http::health))
        .route("/metrics", get(http::metrics))
        .route("/wa/status", get(http::wa_status))
        .route("/wa/qr", get(http::wa_qr))
        .route("/wa/send", post(http::wa_send))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the shutdown token fires. Returns the bound address
/// (port 0 resolves here) and the serve task handle.
pub async fn listen(state: AppState) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
    let addr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    );
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
        addr,
        source,
    })?;

    let token = state.shutdown.token();
    let router = build_router(state);
    let handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    info!(%local_addr, "listening");
    Ok((local_addr, handle))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use courier_gateway::driver::mock::MockDriverFactory;
    use courier_gateway::{BatchSender, GatewayConfig, LifecycleManager, NoopPacer};
    use courier_store::open_memory_pool;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use crate::auth::TokenVerifier;
    use crate::settings::Settings;
    use crate::shutdown::ShutdownCoordinator;
    use crate::ws::ConnectionRegistry;

    fn test_state(dir: &std::path::Path) -> AppState {
        let pool = open_memory_pool().unwrap();
        let config = GatewayConfig {
            artifact_root: dir.to_path_buf(),
            ..GatewayConfig::default()
        };
        let manager = LifecycleManager::new(pool.clone(), MockDriverFactory::new(), None, config);
        let batch = Arc::new(BatchSender::with_pacer(
            Arc::clone(&manager),
            Arc::new(NoopPacer),
        ));
        AppState {
            manager,
            batch,
            pool,
            settings: Arc::new(Settings::default()),
            verifier: TokenVerifier::new(None),
            connections: Arc::new(ConnectionRegistry::new(32)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: PrometheusBuilder::new().build_recorder().handle(),
            start_time: Instant::now(),
            last_qr: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path()));

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["active_sessions"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path()));

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn qr_endpoint_is_404_until_a_qr_is_issued() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let router = build_router(state.clone());

        let response = router
            .clone()
            .oneshot(Request::get("/wa/qr").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        *state.last_qr.lock() = Some("data:image/svg+xml;base64,abc".into());
        let response = router
            .oneshot(Request::get("/wa/qr").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["qr"], "data:image/svg+xml;base64,abc");
    }

    #[tokio::test]
    async fn default_session_status_is_disconnected_at_boot() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path()));

        let response = router
            .oneshot(Request::get("/wa/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["isConnected"], false);
    }

    #[tokio::test]
    async fn send_through_a_dead_default_session_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path()));

        let response = router
            .oneshot(
                Request::post("/wa/send")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"number": "14155550100", "message": "hi"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["code"], "not_connected");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_state(dir.path()));

        let response = router
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

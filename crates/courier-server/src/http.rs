//! Plain HTTP surface: health, metrics, and a small default-session
//! convenience API for callers that do not speak the socket protocol.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use courier_core::AccountId;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub connections: usize,
    pub active_sessions: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        connections: state.connections.count(),
        active_sessions: state.manager.registry().count().await,
    })
}

pub async fn metrics(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

fn default_account(state: &AppState) -> AccountId {
    AccountId::new(
        state.settings.default_session.account_type.clone(),
        state.settings.default_session.username.clone(),
    )
}

/// `GET /wa/status`, reporting on the configured default session.
pub async fn wa_status(State(state): State<AppState>) -> Response {
    let id = default_account(&state);
    match state.manager.check_connection(&id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"code": err.code(), "message": err.to_string()})),
        )
            .into_response(),
    }
}

/// `GET /wa/qr`, returning the most recent pairing QR if one was issued.
pub async fn wa_qr(State(state): State<AppState>) -> Response {
    match state.last_qr.lock().clone() {
        Some(qr) => Json(json!({"qr": qr})).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"code": "qr_not_available", "message": "no pairing QR has been issued"})),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub number: String,
    pub message: String,
}

/// `POST /wa/send`, one message through the default session.
pub async fn wa_send(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Response {
    let id = default_account(&state);
    match state
        .manager
        .send_message(&id, &req.number, &req.message)
        .await
    {
        Ok(()) => Json(json!({"status": true})).into_response(),
        Err(err) => {
            let code = match err {
                courier_core::GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
                courier_core::GatewayError::NotReady { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                code,
                Json(json!({"status": false, "code": err.code(), "message": err.to_string()})),
            )
                .into_response()
        }
    }
}

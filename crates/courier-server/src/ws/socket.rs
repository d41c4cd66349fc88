//! Socket lifecycle: upgrade, paired reader/writer tasks, ping heartbeat,
//! and a per-connection inactivity timeout. A client that neither sends
//! frames nor answers pings gets closed; the rest of the process never
//! notices.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::json;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::state::AppState;
use crate::ws::handler::dispatch;

/// `GET /ws` upgrade endpoint.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(state.settings.server.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    if state.connections.count() >= state.settings.server.max_ws_clients {
        warn!(
            limit = state.settings.server.max_ws_clients,
            "client limit reached, refusing connection"
        );
        let refusal = json!({
            "status": false,
            "code": "connection_limit_reached",
            "message": "too many clients connected",
        });
        if let Ok(text) = serde_json::to_string(&refusal) {
            let _ = sink.send(Message::Text(Utf8Bytes::from(text))).await;
        }
        let _ = sink.close().await;
        return;
    }

    let (conn, mut rx) = state.connections.register();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).set(state.connections.count() as f64);
    info!(client = %conn.id, "client connected");

    let heartbeat = state.settings.heartbeat_interval();
    let idle_limit = state.settings.ws_inactivity_timeout();
    let shutdown = state.shutdown.token();

    // Writer: drains the outbound queue and pings on the heartbeat cadence.
    // A missed pong since the previous tick ends the connection.
    let writer_conn = Arc::clone(&conn);
    let mut writer = tokio::spawn(async move {
        let mut ticker = interval(heartbeat);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sink
                        .send(Message::Text(Utf8Bytes::from(frame.as_str())))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !writer_conn.check_alive() {
                        debug!(client = %writer_conn.id, "heartbeat missed, closing");
                        break;
                    }
                    if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    // Reader: every received frame counts as liveness; text frames are
    // dispatched and the reply queued back through the connection handle.
    let reader_conn = Arc::clone(&conn);
    let reader_state = state.clone();
    let mut reader = tokio::spawn(async move {
        loop {
            let next = match timeout(idle_limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!(client = %reader_conn.id, "inactive connection timed out");
                    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => "idle").increment(1);
                    break;
                }
            };
            match next {
                Some(Ok(Message::Text(text))) => {
                    reader_conn.mark_alive();
                    let reply = dispatch(&reader_state, &reader_conn, text.as_str()).await;
                    let _ = reader_conn.send_json(&reply);
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                    reader_conn.mark_alive();
                }
                Some(Ok(Message::Close(_))) | None => {
                    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => "closed").increment(1);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client = %reader_conn.id, error = %e, "socket error");
                    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => "error").increment(1);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
        _ = shutdown.cancelled() => {
            reader.abort();
            writer.abort();
        }
    }

    state.connections.unregister(&conn.id);
    gauge!(WS_CONNECTIONS_ACTIVE).set(state.connections.count() as f64);
    info!(client = %conn.id, dropped = conn.drop_count(), "client disconnected");
}

//! Command dispatch — parses one inbound frame, verifies identity, routes
//! to the lifecycle manager, and always produces a reply payload. A failing
//! handler degrades to an error payload; it never takes the connection or
//! the process down.

use std::sync::Arc;
use std::time::Instant;

use courier_core::{AccountId, GatewayError};
use courier_gateway::{InitOutcome, QrCallback, TeardownOutcome, reconcile};
use courier_store::{AssistantRepo, SessionRepo};
use metrics::{counter, histogram};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::metrics::{WS_COMMANDS_TOTAL, WS_COMMAND_DURATION_SECONDS, WS_COMMAND_ERRORS_TOTAL};
use crate::state::AppState;
use crate::ws::connection::ClientConnection;
use crate::ws::envelope::{Command, error_reply, gateway_error_reply, ok_reply};

/// Handle one inbound text frame and return the reply payload.
#[instrument(skip_all, fields(action))]
pub async fn dispatch(state: &AppState, conn: &Arc<ClientConnection>, raw: &str) -> Value {
    let cmd: Command = match serde_json::from_str(raw) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!("invalid JSON frame");
            return error_reply("unknown", "validation_error", &format!("invalid JSON: {e}"));
        }
    };

    let action = cmd.action.clone();
    let _ = tracing::Span::current().record("action", action.as_str());
    debug!(action, "dispatching command");
    counter!(WS_COMMANDS_TOTAL, "action" => action.clone()).increment(1);

    let started = Instant::now();
    let reply = run_action(state, conn, cmd).await;
    histogram!(WS_COMMAND_DURATION_SECONDS, "action" => action.clone())
        .record(started.elapsed().as_secs_f64());

    if reply["status"] == json!(false) {
        let code = reply["code"].as_str().unwrap_or("unknown").to_owned();
        counter!(WS_COMMAND_ERRORS_TOTAL, "action" => action, "code" => code).increment(1);
    }
    reply
}

async fn run_action(state: &AppState, conn: &Arc<ClientConnection>, cmd: Command) -> Value {
    let action = cmd.action.clone();
    match action.as_str() {
        // Account-free administrative queries.
        "folderSessions" => folder_sessions(state, &action),
        "listSession" => list_sessions(state, &action),
        "list_orphaned_sessions" => orphaned_sessions(state, &action, false),
        "cleanup_orphaned_sessions" => orphaned_sessions(state, &action, true),

        "initialize" => with_account(state, &cmd, |id| initialize(state, conn, &action, id)).await,
        "checkStatus" => with_account(state, &cmd, |id| check_status(state, &action, id)).await,
        "disconnect" => with_account(state, &cmd, |id| disconnect(state, &action, id)).await,
        "sendMessages" => {
            with_account(state, &cmd, |id| send_messages(state, &action, id, &cmd)).await
        }
        "createGroup" => {
            with_account(state, &cmd, |id| create_group(state, &action, id, &cmd)).await
        }
        "sendMessageToGroup" => {
            with_account(state, &cmd, |id| send_to_group(state, &action, id, &cmd)).await
        }
        "inviteToGroup" => {
            with_account(state, &cmd, |id| invite_to_group(state, &action, id, &cmd)).await
        }
        "historyWA" => with_account(state, &cmd, |id| history(state, &action, id, &cmd)).await,
        "getUnrepliedMessages" => {
            with_account(state, &cmd, |id| unreplied(state, &action, id, &cmd)).await
        }
        "activateAssistant" | "deactivateAssistant" | "deleteAssistant" => {
            with_account(state, &cmd, |id| assistant_action(state, &action, id, &cmd)).await
        }

        other => error_reply(other, "unknown_action", &format!("unknown action: {other}")),
    }
}

/// Resolve the account, verify the token, then run the handler.
///
/// With verification enforced, the username always comes from the token
/// claims; the envelope's `username` field only matters in open mode.
async fn with_account<F, Fut>(state: &AppState, cmd: &Command, handler: F) -> Value
where
    F: FnOnce(AccountId) -> Fut,
    Fut: Future<Output = Value>,
{
    let claims = match state.verifier.verify(cmd.token.as_deref()) {
        Ok(claims) => claims,
        Err(err) => return error_reply(&cmd.action, err.code(), &err.to_string()),
    };
    let username = claims
        .map(|c| c.username)
        .or_else(|| cmd.username.clone())
        .filter(|u| !u.is_empty());
    let Some(username) = username else {
        return error_reply(&cmd.action, "validation_error", "username is required");
    };
    let Some(account_type) = cmd.account_type.clone().filter(|t| !t.is_empty()) else {
        return error_reply(&cmd.action, "validation_error", "account_type is required");
    };
    handler(AccountId::new(account_type, username)).await
}

/// Best-effort `canReconnect` for not-connected errors.
async fn can_reconnect(state: &AppState, id: &AccountId) -> bool {
    match state.manager.check_connection(id).await {
        Ok(status) => status.can_reconnect,
        Err(_) => false,
    }
}

async fn fail(state: &AppState, action: &str, id: &AccountId, err: GatewayError) -> Value {
    let reconnectable = matches!(err, GatewayError::NotReady { .. })
        && can_reconnect(state, id).await;
    gateway_error_reply(action, &err, reconnectable)
}

async fn initialize(
    state: &AppState,
    conn: &Arc<ClientConnection>,
    action: &str,
    id: AccountId,
) -> Value {
    conn.bind_account(id.clone());

    let qr_conn = Arc::clone(conn);
    let last_qr = Arc::clone(&state.last_qr);
    let on_qr: QrCallback = Arc::new(move |qr: String| {
        *last_qr.lock() = Some(qr.clone());
        let _ = qr_conn.send_json(&json!({
            "action": "qr",
            "status": true,
            "qr": qr,
        }));
    });

    match state.manager.initialize(&id, Some(on_qr)).await {
        Ok(InitOutcome::Started) => ok_reply(action, json!({"outcome": "started"})),
        Ok(InitOutcome::AlreadyConnected) => {
            ok_reply(action, json!({"outcome": "alreadyConnected"}))
        }
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn check_status(state: &AppState, action: &str, id: AccountId) -> Value {
    match state.manager.check_connection(&id).await {
        Ok(status) => match serde_json::to_value(&status) {
            Ok(extra) => ok_reply(action, extra),
            Err(e) => error_reply(action, "internal_error", &e.to_string()),
        },
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn disconnect(state: &AppState, action: &str, id: AccountId) -> Value {
    match state.manager.disconnect_and_wipe(&id).await {
        Ok(outcome) => ok_reply(
            action,
            json!({"removed": outcome == TeardownOutcome::Removed}),
        ),
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn send_messages(state: &AppState, action: &str, id: AccountId, cmd: &Command) -> Value {
    let Some(data) = &cmd.data else {
        return error_reply(action, "validation_error", "data.messages is required");
    };
    let project = cmd.type_project.as_deref().unwrap_or("text");
    match state
        .batch
        .send_batch(&id, project, &data.messages, cmd.file_url.as_deref())
        .await
    {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(extra) => ok_reply(action, extra),
            Err(e) => error_reply(action, "internal_error", &e.to_string()),
        },
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn create_group(state: &AppState, action: &str, id: AccountId, cmd: &Command) -> Value {
    let name = cmd.group_name.as_deref().unwrap_or_default();
    let participants = cmd.participants.clone().unwrap_or_default();
    match state.manager.create_group(&id, name, &participants).await {
        Ok(group_id) => ok_reply(action, json!({"groupId": group_id})),
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn send_to_group(state: &AppState, action: &str, id: AccountId, cmd: &Command) -> Value {
    let group_id = cmd.group_id.as_deref().unwrap_or_default();
    let Some(body) = cmd.message_group.as_deref().filter(|m| !m.is_empty()) else {
        return error_reply(action, "validation_error", "messageGroup is required");
    };
    match state.manager.send_to_group(&id, group_id, body).await {
        Ok(()) => ok_reply(action, json!({})),
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn invite_to_group(state: &AppState, action: &str, id: AccountId, cmd: &Command) -> Value {
    let group_id = cmd.group_id.as_deref().unwrap_or_default();
    let participants = cmd.participants.clone().unwrap_or_default();
    match state
        .manager
        .invite_to_group(&id, group_id, &participants)
        .await
    {
        Ok(()) => ok_reply(action, json!({})),
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn history(state: &AppState, action: &str, id: AccountId, cmd: &Command) -> Value {
    let Some(contact) = cmd.target_number.as_deref().filter(|t| !t.is_empty()) else {
        return error_reply(action, "validation_error", "targetNumber is required");
    };
    let limit = cmd.limit.unwrap_or(50);
    match state.manager.chat_history(&id, contact, limit).await {
        Ok(messages) => ok_reply(action, json!({"messages": messages})),
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn unreplied(state: &AppState, action: &str, id: AccountId, cmd: &Command) -> Value {
    let days_ago = cmd.days_ago.unwrap_or(1);
    match state.manager.unreplied_messages(&id, days_ago).await {
        Ok(messages) => ok_reply(action, json!({"messages": messages})),
        Err(err) => fail(state, action, &id, err).await,
    }
}

async fn assistant_action(state: &AppState, action: &str, id: AccountId, cmd: &Command) -> Value {
    let conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return error_reply(action, "store_error", &e.to_string()),
    };
    match action {
        "activateAssistant" => {
            let Some(sender) = cmd.sender_number.as_deref().filter(|s| !s.is_empty()) else {
                return error_reply(action, "validation_error", "senderNumber is required");
            };
            match AssistantRepo::activate(&conn, sender, &id.username, &id.account_type) {
                Ok(row) => ok_reply(action, json!({"assistant": row})),
                Err(e) => error_reply(action, "store_error", &e.to_string()),
            }
        }
        "deactivateAssistant" => {
            let Some(sender) = cmd.sender_number.as_deref().filter(|s| !s.is_empty()) else {
                return error_reply(action, "validation_error", "senderNumber is required");
            };
            match AssistantRepo::deactivate(&conn, sender) {
                Ok(changed) => ok_reply(action, json!({"deactivated": changed})),
                Err(e) => error_reply(action, "store_error", &e.to_string()),
            }
        }
        _ => match AssistantRepo::delete_for_account(&conn, &id.username, &id.account_type) {
            Ok(removed) => ok_reply(action, json!({"removed": removed})),
            Err(e) => error_reply(action, "store_error", &e.to_string()),
        },
    }
}

fn folder_sessions(state: &AppState, action: &str) -> Value {
    let root = &state.manager.config().artifact_root;
    let mut folders = Vec::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                folders.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    folders.sort_unstable();
    ok_reply(action, json!({"folders": folders}))
}

fn list_sessions(state: &AppState, action: &str) -> Value {
    let conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return error_reply(action, "store_error", &e.to_string()),
    };
    match SessionRepo::list(&conn) {
        Ok(rows) => ok_reply(action, json!({"sessions": rows})),
        Err(e) => error_reply(action, "store_error", &e.to_string()),
    }
}

fn orphaned_sessions(state: &AppState, action: &str, cleanup: bool) -> Value {
    let conn = match state.pool.get() {
        Ok(conn) => conn,
        Err(e) => return error_reply(action, "store_error", &e.to_string()),
    };
    let root = &state.manager.config().artifact_root;
    let result = if cleanup {
        reconcile::cleanup_orphaned(&conn, root)
    } else {
        reconcile::list_orphaned(&conn, root)
    };
    match result {
        Ok(names) => ok_reply(action, json!({"orphaned": names})),
        Err(err) => error_reply(action, err.code(), &err.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

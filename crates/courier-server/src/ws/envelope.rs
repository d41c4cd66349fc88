//! Wire envelope for WebSocket commands and their reply payloads.
//!
//! Commands arrive as one JSON object per text frame. Field casing follows
//! the historical dashboard protocol: `account_type` is snake_case, the
//! rest camelCase.

use courier_core::GatewayError;
use courier_gateway::BatchItem;
use serde::Deserialize;
use serde_json::{Value, json};

/// One inbound command frame.
#[derive(Debug, Default, Deserialize)]
pub struct Command {
    pub action: String,
    /// Messaging backend discriminator, e.g. `wa`.
    #[serde(default)]
    pub account_type: Option<String>,
    /// Account username; used only when token verification is disabled,
    /// otherwise the token claims win.
    #[serde(default)]
    pub username: Option<String>,
    /// Identity token (HS256 JWT).
    #[serde(default)]
    pub token: Option<String>,
    /// Batch shape discriminator: `text`, `image`, `pdf`, `docx`, `file`.
    #[serde(default, rename = "typeProject")]
    pub type_project: Option<String>,
    /// Batch payload.
    #[serde(default)]
    pub data: Option<CommandData>,
    /// Batch-level media URL fallback.
    #[serde(default, rename = "fileUrl")]
    pub file_url: Option<String>,
    #[serde(default, rename = "groupName")]
    pub group_name: Option<String>,
    #[serde(default, rename = "groupId")]
    pub group_id: Option<String>,
    #[serde(default, rename = "messageGroup")]
    pub message_group: Option<String>,
    #[serde(default)]
    pub participants: Option<Vec<String>>,
    /// Contact number for history queries.
    #[serde(default, rename = "targetNumber")]
    pub target_number: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, rename = "daysAgo")]
    pub days_ago: Option<u32>,
    /// Assistant activation target.
    #[serde(default, rename = "senderNumber")]
    pub sender_number: Option<String>,
}

/// The `data` object of batch commands.
#[derive(Debug, Default, Deserialize)]
pub struct CommandData {
    #[serde(default)]
    pub messages: Vec<BatchItem>,
}

/// Success reply. `extra` fields are merged into the payload.
pub fn ok_reply(action: &str, extra: Value) -> Value {
    let mut payload = json!({
        "status": true,
        "action": action,
    });
    if let (Some(base), Some(more)) = (payload.as_object_mut(), extra.as_object()) {
        for (key, value) in more {
            let _ = base.insert(key.clone(), value.clone());
        }
    }
    payload
}

/// Error reply with a stable `code`. Never crashes the connection.
pub fn error_reply(action: &str, code: &str, message: &str) -> Value {
    json!({
        "status": false,
        "action": action,
        "code": code,
        "message": message,
    })
}

/// Error reply for a [`GatewayError`], with `canReconnect` attached to
/// not-connected errors so the dashboard knows a resume is possible.
pub fn gateway_error_reply(action: &str, err: &GatewayError, can_reconnect: bool) -> Value {
    let mut payload = error_reply(action, err.code(), &err.to_string());
    if matches!(err, GatewayError::NotReady { .. }) {
        if let Some(map) = payload.as_object_mut() {
            let _ = map.insert("canReconnect".into(), json!(can_reconnect));
        }
    }
    payload
}

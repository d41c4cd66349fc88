//! Row structs returned by the repositories.

use serde::{Deserialize, Serialize};

/// A durable session record — exists iff the session has reached
/// `CONNECTED` at least once and has not been explicitly deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    /// Auto-increment row id.
    pub session_id: i64,
    /// Owning user.
    pub username: String,
    /// Account category.
    pub account_type: String,
    /// `active` or `inactive`.
    pub status: String,
    /// Phone identity assigned at ready time.
    pub phone_number: String,
    /// ISO 8601 creation time.
    pub created_at: String,
    /// ISO 8601 last update time.
    pub updated_at: String,
}

/// Totals for one batch dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReportRow {
    /// Report id (`rpt_` + uuid v7).
    pub id: String,
    /// Account category the batch ran under.
    pub account_type: String,
    /// `text`, `file`, `pdf`, `docx`, or `image`.
    pub project_type: String,
    /// Last message body in the batch (kept for dashboard preview).
    pub message: String,
    /// Items delivered.
    pub total_success: i64,
    /// Items failed.
    pub total_failed: i64,
    /// Total items processed.
    pub total_messages: i64,
    /// ISO 8601 creation time.
    pub created_at: String,
}

/// Per-recipient outcome within a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    /// Result id (`res_` + uuid v7).
    pub id: String,
    /// Parent report id.
    pub report_id: String,
    /// Account category.
    pub account_type: String,
    /// Project type of the batch.
    pub project_type: String,
    /// Recipient phone number as submitted.
    pub recipient: String,
    /// Whether delivery succeeded.
    pub success: bool,
    /// Outcome detail (error text on failure).
    pub detail: String,
    /// ISO 8601 creation time.
    pub created_at: String,
}

/// An assistant activation: auto-replies fire for messages addressed to
/// `sender_number` while status is `active`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRow {
    /// Assistant id (`ast_` + uuid v7).
    pub id: String,
    /// The managed account's phone identity the assistant answers for.
    pub sender_number: String,
    /// Owning user.
    pub username: String,
    /// Account category.
    pub account_type: String,
    /// `active` or `inactive`.
    pub status: String,
    /// ISO 8601 creation time.
    pub created_at: String,
    /// ISO 8601 last update time.
    pub updated_at: String,
}

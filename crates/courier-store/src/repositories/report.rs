//! Batch report repository — totals in `received_data`, per-item rows in
//! `results`.

use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::errors::Result;
use crate::row_types::{BatchReportRow, ResultRow};

/// One per-recipient outcome to persist.
pub struct ItemOutcome<'a> {
    /// Recipient phone number as submitted.
    pub recipient: &'a str,
    /// Whether delivery succeeded.
    pub success: bool,
    /// Outcome detail (error text on failure).
    pub detail: &'a str,
}

/// Batch report repository — stateless, every method takes `&Connection`.
pub struct ReportRepo;

impl ReportRepo {
    /// Persist a batch report with its per-item results in one transaction.
    pub fn insert(
        conn: &mut Connection,
        account_type: &str,
        project_type: &str,
        message: &str,
        items: &[ItemOutcome<'_>],
    ) -> Result<BatchReportRow> {
        let now = chrono::Utc::now().to_rfc3339();
        let report_id = format!("rpt_{}", Uuid::now_v7());
        let total_success = items.iter().filter(|i| i.success).count() as i64;
        let total_failed = items.len() as i64 - total_success;

        let tx = conn.transaction()?;
        let _ = tx.execute(
            "INSERT INTO received_data (id, account_type, project_type, message, total_success, total_failed, total_messages, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                report_id,
                account_type,
                project_type,
                message,
                total_success,
                total_failed,
                items.len() as i64,
                now
            ],
        )?;
        for item in items {
            let _ = tx.execute(
                "INSERT INTO results (id, report_id, account_type, project_type, recipient, success, detail, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    format!("res_{}", Uuid::now_v7()),
                    report_id,
                    account_type,
                    project_type,
                    item.recipient,
                    item.success,
                    item.detail,
                    now
                ],
            )?;
        }
        tx.commit()?;

        Ok(BatchReportRow {
            id: report_id,
            account_type: account_type.to_string(),
            project_type: project_type.to_string(),
            message: message.to_string(),
            total_success,
            total_failed,
            total_messages: items.len() as i64,
            created_at: now,
        })
    }

    /// Per-item results for a report, insertion order.
    pub fn results_for(conn: &Connection, report_id: &str) -> Result<Vec<ResultRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, report_id, account_type, project_type, recipient, success, detail, created_at
             FROM results WHERE report_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![report_id], |row| {
                Ok(ResultRow {
                    id: row.get(0)?,
                    report_id: row.get(1)?,
                    account_type: row.get(2)?,
                    project_type: row.get(3)?,
                    recipient: row.get(4)?,
                    success: row.get(5)?,
                    detail: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent reports, newest first.
    pub fn recent(conn: &Connection, limit: u32) -> Result<Vec<BatchReportRow>> {
        let mut stmt = conn.prepare(
            "SELECT id, account_type, project_type, message, total_success, total_failed, total_messages, created_at
             FROM received_data ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(BatchReportRow {
                    id: row.get(0)?,
                    account_type: row.get(1)?,
                    project_type: row.get(2)?,
                    message: row.get(3)?,
                    total_success: row.get(4)?,
                    total_failed: row.get(5)?,
                    total_messages: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

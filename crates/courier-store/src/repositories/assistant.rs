//! Assistant repository — auto-reply activations keyed by sender number.
//!
//! The incoming-message path asks for the *active* assistant bound to the
//! receiving account's phone identity; if none, the message is ignored.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::errors::Result;
use crate::row_types::AssistantRow;

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssistantRow> {
    Ok(AssistantRow {
        id: row.get(0)?,
        sender_number: row.get(1)?,
        username: row.get(2)?,
        account_type: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const COLUMNS: &str = "id, sender_number, username, account_type, status, created_at, updated_at";

/// Assistant repository — stateless, every method takes `&Connection`.
pub struct AssistantRepo;

impl AssistantRepo {
    /// Activate (or re-activate) the assistant for a sender number.
    pub fn activate(
        conn: &Connection,
        sender_number: &str,
        username: &str,
        account_type: &str,
    ) -> Result<AssistantRow> {
        let now = chrono::Utc::now().to_rfc3339();
        let id = format!("ast_{}", Uuid::now_v7());
        let _ = conn.execute(
            "INSERT INTO assistants (id, sender_number, username, account_type, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?5)
             ON CONFLICT (sender_number)
             DO UPDATE SET status = 'active', username = ?3, account_type = ?4, updated_at = ?5",
            params![id, sender_number, username, account_type, now],
        )?;
        Self::find_by_sender(conn, sender_number)?.ok_or(crate::errors::StoreError::Sqlite(
            rusqlite::Error::QueryReturnedNoRows,
        ))
    }

    /// Mark the assistant for a sender number inactive. Returns `true` if a
    /// row changed.
    pub fn deactivate(conn: &Connection, sender_number: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE assistants SET status = 'inactive', updated_at = ?1 WHERE sender_number = ?2",
            params![now, sender_number],
        )?;
        Ok(changed > 0)
    }

    /// Look up any assistant row for a sender number.
    pub fn find_by_sender(conn: &Connection, sender_number: &str) -> Result<Option<AssistantRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM assistants WHERE sender_number = ?1"),
                params![sender_number],
                |row| row_from(row),
            )
            .optional()?;
        Ok(row)
    }

    /// The active assistant for a sender number, if any.
    pub fn find_active(conn: &Connection, sender_number: &str) -> Result<Option<AssistantRow>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM assistants WHERE sender_number = ?1 AND status = 'active'"
                ),
                params![sender_number],
                |row| row_from(row),
            )
            .optional()?;
        Ok(row)
    }

    /// Delete all assistants for an account. Returns the number removed.
    pub fn delete_for_account(
        conn: &Connection,
        username: &str,
        account_type: &str,
    ) -> Result<usize> {
        let changed = conn.execute(
            "DELETE FROM assistants WHERE username = ?1 AND account_type = ?2",
            params![username, account_type],
        )?;
        Ok(changed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

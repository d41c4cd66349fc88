//! Session repository — CRUD for the `sessions` table.
//!
//! One row per account that has reached `CONNECTED` at least once. The
//! lifecycle manager upserts on ready, deletes on explicit disconnect and on
//! driver-reported disconnection; reconnect checks presence here before
//! starting a driver.

use courier_core::AccountId;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::row_types::SessionRow;

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        session_id: row.get(0)?,
        username: row.get(1)?,
        account_type: row.get(2)?,
        status: row.get(3)?,
        phone_number: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const COLUMNS: &str =
    "session_id, username, account_type, status, phone_number, created_at, updated_at";

/// Session repository — stateless, every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert or refresh the record for `id`, marking it `active` with the
    /// given phone identity.
    pub fn upsert_active(conn: &Connection, id: &AccountId, phone_number: &str) -> Result<SessionRow> {
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO sessions (username, account_type, status, phone_number, created_at, updated_at)
             VALUES (?1, ?2, 'active', ?3, ?4, ?4)
             ON CONFLICT (username, account_type)
             DO UPDATE SET status = 'active', phone_number = ?3, updated_at = ?4",
            params![id.username, id.account_type, phone_number, now],
        )?;
        // The upsert guarantees presence.
        Self::find(conn, id)?
            .ok_or(crate::errors::StoreError::Sqlite(
                rusqlite::Error::QueryReturnedNoRows,
            ))
    }

    /// Look up the record for `id`.
    pub fn find(conn: &Connection, id: &AccountId) -> Result<Option<SessionRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM sessions WHERE username = ?1 AND account_type = ?2"),
                params![id.username, id.account_type],
                |row| row_from(row),
            )
            .optional()?;
        Ok(row)
    }

    /// Whether a record exists for `id`.
    pub fn exists(conn: &Connection, id: &AccountId) -> Result<bool> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE username = ?1 AND account_type = ?2)",
            params![id.username, id.account_type],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Delete the record for `id`. Returns `true` if a row was deleted.
    pub fn delete(conn: &Connection, id: &AccountId) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM sessions WHERE username = ?1 AND account_type = ?2",
            params![id.username, id.account_type],
        )?;
        Ok(changed > 0)
    }

    /// All records, most recently updated first.
    pub fn list(conn: &Connection) -> Result<Vec<SessionRow>> {
        let mut stmt = conn
            .prepare(&format!("SELECT {COLUMNS} FROM sessions ORDER BY updated_at DESC"))?;
        let rows = stmt
            .query_map([], |row| row_from(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records with `status = 'active'` — the set `reconnect_all` resumes
    /// at startup.
    pub fn list_active(conn: &Connection) -> Result<Vec<SessionRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM sessions WHERE status = 'active' ORDER BY updated_at DESC"
        ))?;
        let rows = stmt
            .query_map([], |row| row_from(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count all records.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

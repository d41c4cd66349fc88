//! Schema migrations.
//!
//! Versioned via `PRAGMA user_version`. Each migration is a single batch;
//! adding one means appending to `MIGRATIONS` — never editing an applied
//! entry.

use rusqlite::Connection;
use tracing::debug;

use crate::errors::{Result, StoreError};

const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    "CREATE TABLE sessions (
         session_id   INTEGER PRIMARY KEY AUTOINCREMENT,
         username     TEXT NOT NULL,
         account_type TEXT NOT NULL,
         status       TEXT NOT NULL,
         phone_number TEXT NOT NULL,
         created_at   TEXT NOT NULL,
         updated_at   TEXT NOT NULL,
         UNIQUE (username, account_type)
     );

     CREATE TABLE received_data (
         id             TEXT PRIMARY KEY,
         account_type   TEXT NOT NULL,
         project_type   TEXT NOT NULL,
         message        TEXT NOT NULL,
         total_success  INTEGER NOT NULL,
         total_failed   INTEGER NOT NULL,
         total_messages INTEGER NOT NULL,
         created_at     TEXT NOT NULL
     );

     CREATE TABLE results (
         id           TEXT PRIMARY KEY,
         report_id    TEXT NOT NULL REFERENCES received_data(id) ON DELETE CASCADE,
         account_type TEXT NOT NULL,
         project_type TEXT NOT NULL,
         recipient    TEXT NOT NULL,
         success      INTEGER NOT NULL,
         detail       TEXT NOT NULL,
         created_at   TEXT NOT NULL
     );
     CREATE INDEX idx_results_report ON results(report_id);

     CREATE TABLE assistants (
         id            TEXT PRIMARY KEY,
         sender_number TEXT NOT NULL UNIQUE,
         username      TEXT NOT NULL,
         account_type  TEXT NOT NULL,
         status        TEXT NOT NULL,
         created_at    TEXT NOT NULL,
         updated_at    TEXT NOT NULL
     );",
];

/// Apply any outstanding migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let applied = usize::try_from(version)
        .map_err(|_| StoreError::Migration(format!("bad user_version {version}")))?;

    if applied > MIGRATIONS.len() {
        return Err(StoreError::Migration(format!(
            "database is at version {applied}, this build only knows {}",
            MIGRATIONS.len()
        )));
    }

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(applied) {
        let target = idx + 1;
        debug!(version = target, "applying migration");
        conn.execute_batch(sql)?;
        conn.pragma_update(None, "user_version", target as i64)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn migrations_apply_once() {
        let conn = setup();
        // Re-running should be a no-op, not an error.
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[test]
    fn sessions_unique_per_account() {
        let conn = setup();
        let insert = "INSERT INTO sessions (username, account_type, status, phone_number, created_at, updated_at)
                      VALUES ('alice', 'marketing', 'active', '628123', '2026-01-01', '2026-01-01')";
        let _ = conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn results_cascade_with_report() {
        let conn = setup();
        let _ = conn
            .execute(
                "INSERT INTO received_data (id, account_type, project_type, message, total_success, total_failed, total_messages, created_at)
                 VALUES ('r1', 'marketing', 'text', 'hi', 1, 0, 1, '2026-01-01')",
                [],
            )
            .unwrap();
        let _ = conn
            .execute(
                "INSERT INTO results (id, report_id, account_type, project_type, recipient, success, detail, created_at)
                 VALUES ('d1', 'r1', 'marketing', 'text', '628123', 1, 'ok', '2026-01-01')",
                [],
            )
            .unwrap();
        let _ = conn
            .execute("DELETE FROM received_data WHERE id = 'r1'", [])
            .unwrap();
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))
            .unwrap();
        assert_eq!(left, 0);
    }

    #[test]
    fn future_version_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
        assert!(run_migrations(&conn).is_err());
    }
}

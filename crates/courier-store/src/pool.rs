//! r2d2-backed SQLite connection pool.

use std::path::Path;

use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::errors::{Result, StoreError};
use crate::migrations::run_migrations;

/// Shared connection pool handle.
pub type StorePool = r2d2::Pool<SqliteConnectionManager>;

/// One checked-out connection.
pub type StoreConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Open (or create) the database at `path`, run migrations, return a pool.
///
/// Every connection gets WAL journaling and foreign keys on checkout.
pub fn open_pool(path: &Path) -> Result<StorePool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    let pool = r2d2::Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    run_migrations(&conn)?;
    info!(path = %path.display(), "store opened");
    Ok(pool)
}

/// In-memory pool for tests. Pool size 1 so every checkout sees the same
/// database.
pub fn open_memory_pool() -> Result<StorePool> {
    let manager = SqliteConnectionManager::memory().with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    let pool = r2d2::Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(StoreError::Pool)?;
    let conn = pool.get()?;
    run_migrations(&conn)?;
    Ok(pool)
}

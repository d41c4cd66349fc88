//! Store error type.

use thiserror::Error;

/// Convenience result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Pool exhaustion or checkout failure.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Migration could not be applied.
    #[error("migration failed: {0}")]
    Migration(String),
}

impl From<StoreError> for courier_core::GatewayError {
    fn from(e: StoreError) -> Self {
        courier_core::GatewayError::Store(e.to_string())
    }
}

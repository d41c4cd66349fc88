//! # courier-store
//!
//! SQLite persistence for the Courier gateway.
//!
//! Durable state is small and relational: one row per session that has ever
//! reached `CONNECTED`, batch dispatch reports with per-item results, and
//! assistant activations. Repositories are stateless structs whose methods
//! take `&Connection`; connection pooling lives in [`pool`].
//!
//! ## Tables
//!
//! | Table | Keyed by | Contents |
//! |-------|----------|----------|
//! | `sessions` | `(username, account_type)` | status + phone identity |
//! | `received_data` | uuid | batch totals per dispatch |
//! | `results` | uuid | per-recipient outcome rows |
//! | `assistants` | sender number | auto-reply activations |

#![deny(unsafe_code)]

pub mod errors;
pub mod migrations;
pub mod pool;
pub mod repositories;
pub mod row_types;

pub use errors::{Result, StoreError};
pub use pool::{StoreConn, StorePool, open_memory_pool, open_pool};
pub use repositories::assistant::AssistantRepo;
pub use repositories::report::ReportRepo;
pub use repositories::session::SessionRepo;
pub use row_types::{AssistantRow, BatchReportRow, ResultRow, SessionRow};

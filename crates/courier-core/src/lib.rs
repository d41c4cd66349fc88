//! # courier-core
//!
//! Foundation types for the Courier messaging gateway.
//!
//! This crate provides the shared vocabulary the other courier crates
//! depend on:
//!
//! - **Identity**: [`ids::AccountId`] — the `(account_type, username)` pair
//!   identifying one managed connection, with the joined
//!   `username-account_type` rendering used for artifact directories
//! - **States**: [`state::SessionState`] — the closed per-client lifecycle
//!   state set and its legal transitions
//! - **Errors**: [`errors::GatewayError`] hierarchy via `thiserror`,
//!   mapped to wire status codes
//! - **Retry**: [`retry::RetryPolicy`] — bounded attempts with exponential
//!   backoff, used for auth-failure recovery
//! - **Logging**: [`logging::init`] — tracing subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other courier crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod state;

pub use errors::GatewayError;
pub use ids::AccountId;
pub use state::SessionState;

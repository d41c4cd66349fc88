//! Gateway server: WebSocket command surface plus a small HTTP API over the
//! session lifecycle manager.
//!
//! | Module     | Responsibility                                            |
//! |------------|-----------------------------------------------------------|
//! | `settings` | Layered configuration (defaults, file, environment)       |
//! | `auth`     | Optional JWT verification for the command surface         |
//! | `state`    | Shared handle threaded through every route                |
//! | `ws`       | Command protocol: connections, envelopes, dispatch        |
//! | `http`     | Health, metrics, and default-session convenience routes   |
//! | `server`   | Router assembly and the listen loop                       |
//! | `shutdown` | Cooperative cancellation and bounded task draining        |
//! | `metrics`  | Prometheus recorder and metric names                      |

pub mod auth;
pub mod error;
pub mod http;
pub mod metrics;
pub mod server;
pub mod settings;
pub mod shutdown;
pub mod state;
pub mod ws;

pub use auth::TokenVerifier;
pub use error::ServerError;
pub use server::{build_router, listen};
pub use settings::Settings;
pub use shutdown::ShutdownCoordinator;
pub use state::AppState;

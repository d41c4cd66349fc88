//! Tracing subscriber setup.
//!
//! Installed once at process start. `COURIER_LOG` (falling back to
//! `RUST_LOG`) controls the filter; defaults to `info`.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are ignored (useful in
/// tests where multiple entry points may initialize logging).
pub fn init() {
    let filter = std::env::var("COURIER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_owned());

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .try_init();
}

/// Install a JSON-formatted subscriber for production log shipping.
pub fn init_json() {
    let filter = std::env::var("COURIER_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_owned());

    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(filter))
        .with_current_span(false)
        .try_init();
}

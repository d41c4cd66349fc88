//! Binary entry point: load settings, open the store, wire the lifecycle
//! manager, and serve until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use courier_gateway::driver::bridge::BridgeDriverFactory;
use courier_gateway::{
    AssistantClient, BatchSender, BreakerConfig, BreakerRegistry, LifecycleManager,
};
use courier_server::auth::TokenVerifier;
use courier_server::settings::{self, Settings};
use courier_server::shutdown::ShutdownCoordinator;
use courier_server::state::AppState;
use courier_server::ws::ConnectionRegistry;
use courier_server::{metrics, server};

#[derive(Debug, Parser)]
#[command(name = "courier", about = "Multi-account messaging gateway server")]
struct Cli {
    /// Listen host (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file path.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Bridge driver command (overrides settings).
    #[arg(long)]
    bridge_command: Option<PathBuf>,
}

fn ensure_parent_dir(path: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    courier_core::logging::init();

    let cli = Cli::parse();
    let path = cli.settings.unwrap_or_else(settings::settings_path);
    let mut settings: Settings =
        settings::load_from_path(&path).with_context(|| format!("loading {}", path.display()))?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db_path) = cli.db_path {
        settings.gateway.db_path = db_path;
    }
    if let Some(command) = cli.bridge_command {
        settings.gateway.bridge_command = command;
    }

    ensure_parent_dir(&settings.gateway.db_path)?;
    std::fs::create_dir_all(&settings.gateway.artifact_root)
        .with_context(|| format!("creating {}", settings.gateway.artifact_root.display()))?;

    let pool = courier_store::open_pool(&settings.gateway.db_path)
        .with_context(|| format!("opening {}", settings.gateway.db_path.display()))?;
    info!(db = %settings.gateway.db_path.display(), "store ready");

    let metrics_handle = metrics::install_recorder().context("installing metrics recorder")?;

    let config = settings.gateway_config();
    let factory = Arc::new(BridgeDriverFactory::new(
        settings.gateway.bridge_command.clone(),
    ));
    let assistant = settings.assistant.url.clone().map(|url| {
        AssistantClient::new(
            url,
            config.assistant_timeout,
            Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        )
    });
    let manager = LifecycleManager::new(pool.clone(), factory, assistant, config);

    if settings.auth.jwt_secret.is_none() {
        warn!("no JWT secret configured, command verification is disabled");
    }

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let resumed = manager.reconnect_all().await;
    if resumed > 0 {
        info!(resumed, "resumed persisted sessions");
    }
    courier_gateway::governor::spawn(Arc::clone(&manager), shutdown.token());

    let state = AppState {
        batch: Arc::new(BatchSender::new(Arc::clone(&manager))),
        manager,
        pool,
        verifier: TokenVerifier::new(settings.auth.jwt_secret.clone()),
        settings: Arc::new(settings),
        connections: Arc::new(ConnectionRegistry::new(64)),
        shutdown: Arc::clone(&shutdown),
        metrics: metrics_handle,
        start_time: Instant::now(),
        last_qr: Arc::new(parking_lot::Mutex::new(None)),
    };

    let manager = Arc::clone(&state.manager);
    let (_addr, serve_handle) = server::listen(state).await?;

    wait_for_signal().await;
    info!("shutdown signal received");

    shutdown.shutdown();
    manager.shutdown().await;
    shutdown.graceful_shutdown(vec![serve_handle], None).await;
    info!("goodbye");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "could not install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

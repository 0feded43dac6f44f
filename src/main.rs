use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aitrail::audit::worker::{DEFAULT_MAX_PENDING, DEFAULT_QUEUE_SIZE};
use aitrail::audit::{AuditWorker, FileStorage};
use aitrail::{cli, config, router, AppState};

/// Upper bound on the post-shutdown audit drain, matching the window we
/// give in-flight streaming monitors to finish.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "aitrail=info,tower_http=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = cli::Cli::parse();
    let (port_override, config_path) = match args.command {
        Some(cli::Commands::Serve { port, config }) => (port, config),
        None => (None, PathBuf::from("config.yaml")),
    };

    let mut cfg = config::Config::load(&config_path)?;
    if let Some(port) = port_override {
        cfg.server.port = port;
    }

    tracing::info!(
        endpoints = cfg.endpoints.len(),
        "configuration loaded from {}",
        config_path.display()
    );
    for ep in &cfg.endpoints {
        tracing::info!("  endpoint {} -> {}", ep.name, ep.target);
    }

    let storage = Arc::new(FileStorage::new(&cfg.storage.path)?);
    tracing::info!("journal store initialized: {}", cfg.storage.path);

    let (worker, audit) = AuditWorker::spawn(
        storage,
        &cfg.server.genesis_seed,
        DEFAULT_QUEUE_SIZE,
        DEFAULT_MAX_PENDING,
    );
    tracing::info!("audit worker started");

    let port = cfg.server.port;
    let state = Arc::new(AppState::new(cfg, audit));
    let app = router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("aitrail proxy listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown signal received, flushing audit entries");
    // Release this side's audit handle so the worker's intake can close
    // once the last streaming monitor finishes.
    drop(state);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, worker.join())
        .await
        .is_err()
    {
        tracing::warn!("audit drain did not finish within {SHUTDOWN_TIMEOUT:?}");
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

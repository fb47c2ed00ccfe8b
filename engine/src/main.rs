//! Process bootstrap for the session engine
//!
//! Loads configuration from the environment, refuses non-loopback binds,
//! and serves the HTTP API until a shutdown signal arrives. Exit codes:
//! 0 clean shutdown, 2 misconfiguration, 1 unexpected error.

use anyhow::Context;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use callscribe_engine::config::EngineConfig;
use callscribe_engine::server::{self, AppState};
use callscribe_engine::session::registry::SessionRegistry;

fn main() -> ExitCode {
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("callscribe-engine: configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to start async runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "engine exited with error");
            ExitCode::from(1)
        }
    }
}

async fn run(config: EngineConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let mode = config.server.mode;

    let state = AppState::new(config).context("failed to build engine state")?;
    let registry = state.registry.clone();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, %mode, "engine listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .context("server error")?;

    info!("engine shut down cleanly");
    Ok(())
}

/// Resolve on SIGINT/SIGTERM after aborting any in-flight sessions.
async fn shutdown_signal(registry: Arc<SessionRegistry>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("shutdown signal received, aborting active sessions");

    for session in registry.drain_active().await {
        let id = session.id().to_string();
        session.abort().await;
        if let Some(outcome) = session.outcome().await {
            registry.finish(&id, outcome).await;
        }
    }
}

mod bootstrap;
mod bot;
mod health;
mod webhook;

use std::time::Duration;

use anyhow::{Context, Result};
use parley_core::config::{AppConfig, LoadOptions};
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use parley_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind webhook listener on {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        webhook_path = webhook::WEBHOOK_PATH,
        "parley-server listening for slack events"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    axum::serve(listener, app.router).with_graceful_shutdown(wait_for_shutdown(grace)).await?;
    drain_handlers(&app.tasks, grace).await;

    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "parley-server stopped"
    );
    Ok(())
}

/// Waits for bot replies still being delivered after the listener closed.
async fn drain_handlers(tasks: &TaskTracker, grace: Duration) {
    tasks.close();
    let in_flight = tasks.len();
    if in_flight == 0 {
        return;
    }

    tracing::info!(
        event_name = "system.server.draining_handlers",
        correlation_id = "shutdown",
        in_flight,
        "waiting for in-flight bot replies"
    );
    if tokio::time::timeout(grace, tasks.wait()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.handlers_abandoned",
            correlation_id = "shutdown",
            in_flight = tasks.len(),
            "bot replies still running at shutdown deadline"
        );
    }
}

/// Resolves on ctrl-c.
///
/// Connections and bot replies each get `grace` to drain, so the hard exit fires after twice that.
async fn wait_for_shutdown(grace: Duration) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "parley-server draining in-flight requests"
    );
    tokio::spawn(async move {
        tokio::time::sleep(grace.saturating_mul(2)).await;
        tracing::warn!(
            event_name = "system.server.forced_exit",
            correlation_id = "shutdown",
            "graceful shutdown deadline exceeded"
        );
        std::process::exit(1);
    });
}

use std::future::IntoFuture;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use ventix_core::config::{AppConfig, LoadOptions};
use ventix_server::{api, bootstrap, health, housekeeping};

fn init_logging(config: &AppConfig) {
    use ventix_core::config::LogFormat::*;

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let shutdown = CancellationToken::new();

    let provider_pool =
        app.services.runtime.router().invoker().map(|invoker| invoker.pool().clone());
    let routes = api::router(app.services.clone(), shutdown.clone())
        .merge(health::router(app.db_pool.clone(), provider_pool));

    let eviction = housekeeping::spawn_context_eviction(
        app.services.context.clone(),
        housekeeping::eviction_period(&app.services.context),
        shutdown.clone(),
    );

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "ventix-server listening"
    );

    let server = axum::serve(listener, routes)
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .into_future();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(
                event_name = "system.server.forced_shutdown",
                correlation_id = "shutdown",
                grace_secs = grace.as_secs(),
                "in-flight requests did not finish within the grace period"
            );
        }
    }

    shutdown.cancel();
    let _ = eviction.await;
    app.db_pool.close().await;
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "ventix-server stopped"
    );

    Ok(())
}

/// Resolves on Ctrl-C and cancels in-flight provider calls so their turns
/// finish on the keyword fallback.
async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = shutdown.cancelled() => {}
    }
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "shutdown requested"
    );
    shutdown.cancel();
}

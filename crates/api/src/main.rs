use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use jex_events_api::app::{build_app, services};
use jex_events_infra::{
    broker::AmqpConnector,
    config::Configuration,
    workers::{Supervisor, SupervisorSettings},
};

/// Consume scheduler job events from AMQP, record them and forward them.
#[derive(Debug, Parser)]
#[command(name = "jex-events", version)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, short)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    jex_events_observability::init();
    let cli = Cli::parse();

    let config = Configuration::from_path(&cli.config)?;
    config.validate().context("invalid configuration")?;
    let port = config.listen_port()?;

    let services = Arc::new(services::build_services(&config).await?);
    let shutdown = CancellationToken::new();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind 0.0.0.0:{port}"))?;
    tracing::info!("admin listener on {}", listener.local_addr()?);

    let app = build_app(services.clone());
    let http_shutdown = shutdown.clone();
    let http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await
    });

    let supervisor = Supervisor::new(
        AmqpConnector::new(),
        config.topology(),
        services.dispatch_context(),
        SupervisorSettings::default(),
    )
    .spawn(shutdown.clone());

    shutdown_signal().await;
    tracing::info!("shutdown requested");
    shutdown.cancel();

    supervisor.await.context("supervisor task failed")?;
    http.await
        .context("admin listener task failed")?
        .context("admin listener failed")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

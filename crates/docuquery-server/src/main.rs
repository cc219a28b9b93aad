//! docuquery-server - REST API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use docuquery_core::{DocuqueryConfig, ReprocessScheduler};
use docuquery_server::{create_server, create_state};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("docuquery_server=debug".parse()?),
        )
        .init();

    let config = DocuqueryConfig::load().context("loading configuration")?;
    info!(
        extraction = %config.extraction.url,
        ocr = %config.ocr.url,
        workers = config.workers.max_concurrent,
        "Configuration loaded"
    );

    let state = create_state(&config)
        .await
        .context("initializing backends")?;

    let mut scheduler = if config.reprocess.enabled {
        let sweep = Arc::new(state.reprocess_sweep(config.reprocess.clone()));
        let scheduler = ReprocessScheduler::new(sweep)
            .await
            .context("creating reprocessing scheduler")?;
        scheduler
            .start()
            .await
            .context("starting reprocessing scheduler")?;
        Some(scheduler)
    } else {
        info!("Reprocessing of failed documents disabled");
        None
    };

    let app = create_server(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!("Starting docuquery-server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Shutdown signal received, draining in-flight requests");
        })
        .await?;

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler
            .shutdown()
            .await
            .context("stopping reprocessing scheduler")?;
    }

    info!("Server stopped cleanly");
    Ok(())
}

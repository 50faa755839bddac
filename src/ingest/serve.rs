//! Daemon mode (`serve` subcommand): runs the HTTP receiver until signalled.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::ReceiverConfig;
use crate::ingest::pipeline::IngestPipeline;
use crate::ingest::server::{build_router, AppState};
use crate::metrics::Registry;
use crate::redact::Redactor;

pub async fn run(config: ReceiverConfig) -> Result<()> {
    let metrics = Arc::new(Registry::new());
    let redactor = Redactor::new(&config.redact_patterns);
    let pipeline = IngestPipeline::spawn(&config, metrics.clone())
        .context("starting writer thread")?;

    let state = Arc::new(AppState {
        pipeline,
        metrics,
        redactor,
    });
    let router = build_router(&config, state.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!("logtap receiver listening on {}", config.listen_addr);
    tracing::info!("capture directory: {}", config.capture_dir.display());

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("shutdown signal received, draining writer...");
    let state = Arc::try_unwrap(state)
        .unwrap_or_else(|_| panic!("AppState has outstanding references after server shutdown"));
    state.pipeline.shutdown();
    tracing::info!("logtap receiver stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm.recv() => {},
    }
}

#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::lifecycle::Lifecycle;
use server::service::{AppState, router};
use server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry(config.log_json)?;
    log_startup_info(&config);

    let lifecycle = Lifecycle::start(&config).await?;
    let lost = lifecycle.lease_lost_token();
    let app = router(AppState::new(lifecycle.generator()));

    let listener = TcpListener::bind(&config.server_addr).await?;
    tracing::info!(
        addr = %config.server_addr,
        worker_id = lifecycle.worker_id(),
        "serving ids"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(lost.clone()))
        .await;

    lifecycle.shutdown().await;
    served?;

    if lost.is_cancelled() {
        anyhow::bail!("worker lease lost, stopped serving to avoid duplicate ids");
    }
    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting ID service with full config: {:#?}", config);
    } else {
        tracing::info!(
            addr = %config.server_addr,
            worker_id_bits = config.layout.worker_id_bits(),
            sequence_bits = config.layout.sequence_bits(),
            "Starting ID service"
        );
    }
}

/// Resolves on Ctrl+C, SIGTERM, or loss of the worker lease.
async fn shutdown_signal(lost: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = lost.cancelled() => tracing::error!("Worker lease lost, shutting down"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}

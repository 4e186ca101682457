use anyhow::{Context, Result};
use std::sync::Arc;
use telemetry_ingest::{
    DirectoryMonitor, FileClassifier, IngestConfig, Ingestor, RecordExtractor, ServiceConfig,
};
use telemetry_storage::{SqliteStore, TelemetryStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = IngestConfig::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        directory = %config.watch.directory.display(),
        database = %config.database.path.display(),
        "Starting telemetry ingest service"
    );

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    if !config.watch.directory.exists() {
        std::fs::create_dir_all(&config.watch.directory).with_context(|| {
            format!(
                "Failed to create watch directory {}",
                config.watch.directory.display()
            )
        })?;
        warn!(directory = %config.watch.directory.display(), "Created missing watch directory");
    }

    let store = Arc::new(
        SqliteStore::open(&config.database)
            .await
            .context("Failed to open telemetry store")?,
    );

    let ingestor = Ingestor::new(
        store.clone(),
        FileClassifier::from_config(&config.watch),
        RecordExtractor::from_config(&config.ingestion),
    )
    .with_file_concurrency(config.ingestion.file_concurrency);

    let monitor = DirectoryMonitor::new(&config, ingestor);

    let cancel = CancellationToken::new();
    let monitor_handle = tokio::spawn(monitor.run(cancel.clone()));

    info!("Ingest service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down ingest service");

    cancel.cancel();
    let summary = monitor_handle
        .await
        .context("Directory monitor task failed")?;

    match store.stats().await {
        Ok(stats) => info!(?stats, ?summary, "Final ingest state"),
        Err(e) => warn!(error = %e, "Failed to read final store stats"),
    }
    store.close().await;

    info!("Ingest service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &ServiceConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

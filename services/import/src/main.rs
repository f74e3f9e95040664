use anyhow::{Context, Result};
use catalog_pipeline::SqsQueue;
use import_service::upload_api::start_api_server;
use import_service::{AppState, Config, IngestionWorker, S3Gateway, StorageEventTrigger, TriggerSettings};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting catalog import service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let object_store = Arc::new(S3Gateway::new(&config.s3).await);
    let items_queue = Arc::new(SqsQueue::new(&config.queue).await);
    let events_queue = Arc::new(SqsQueue::new(&config.events.queue).await);

    let worker = Arc::new(IngestionWorker::new(
        object_store.clone(),
        items_queue,
        config.ingest.clone(),
    ));

    let trigger = StorageEventTrigger::new(
        events_queue,
        worker,
        TriggerSettings {
            max_messages: config.events.max_messages,
            wait_time: config.events_wait_time(),
            visibility_timeout: config.events_visibility_timeout(),
            invocation_timeout: config.invocation_timeout(),
        },
    );

    let api_state = AppState { object_store };

    // Spawn storage event trigger task
    let trigger_handle = tokio::spawn(async move {
        trigger.run().await;
    });

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Import service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down import service");

    trigger_handle.abort();
    api_handle.abort();

    info!("Import service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
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
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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

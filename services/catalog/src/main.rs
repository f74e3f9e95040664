use anyhow::{Context, Result};
use catalog_pipeline::{KafkaNotifier, SqsQueue};
use catalog_service::{BatchConsumer, BatchTrigger, Config, PgCatalogStore};
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
        batch_size = config.consumer.batch_size,
        "Starting catalog service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let store = Arc::new(
        PgCatalogStore::new(&config.database)
            .await
            .context("Failed to initialize catalog store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let notifier = Arc::new(
        KafkaNotifier::new(&config.notifications)
            .context("Failed to initialize notification producer")?,
    );
    let queue = Arc::new(SqsQueue::new(&config.queue).await);

    let consumer = Arc::new(BatchConsumer::new(store, notifier));
    let trigger = BatchTrigger::new(queue, consumer, config.consumer.clone());

    // Spawn batch trigger task
    let trigger_handle = tokio::spawn(async move {
        trigger.run().await;
    });

    info!("Catalog service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down catalog service");

    trigger_handle.abort();
    // Wait for the task to drop so the notifier flushes its queue.
    let _ = trigger_handle.await;

    info!("Catalog service stopped");

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

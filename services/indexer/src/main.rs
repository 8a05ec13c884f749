use anyhow::{Context, Result};
use image_indexer::api::start_api_server;
use image_indexer::{
    AppState, BlobCache, BlobStore, Config, DynamoMetadataStore, Extractor, MetadataStore,
    NotificationConsumer, QueryService, S3BlobStore,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
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
        bucket = %config.s3.bucket,
        table = %config.dynamodb.table,
        key_prefix = %config.index.key_prefix,
        "Starting image indexer"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let blob_store: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(&config.s3).await);
    let metadata_store: Arc<dyn MetadataStore> =
        Arc::new(DynamoMetadataStore::new(&config.dynamodb).await);

    let cache = BlobCache::open(config.cache.directory.clone())
        .await
        .context("Failed to open blob cache directory")?;

    let extractor = Extractor::new(
        blob_store.clone(),
        metadata_store.clone(),
        config.s3.bucket.clone(),
    );
    let query = QueryService::new(
        metadata_store,
        blob_store,
        cache,
        config.index.key_prefix.clone(),
    );

    let shutdown = CancellationToken::new();

    // Spawn notification consumer task
    let consumer_handle = match config.trigger.kafka {
        Some(ref kafka) => {
            let consumer = NotificationConsumer::new(kafka, &config.trigger, extractor.clone())
                .context("Failed to initialize Kafka consumer")?;
            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = consumer.run(token).await {
                    error!(error = %e, "Notification consumer error");
                }
            }))
        }
        None => {
            info!("No Kafka trigger configured, accepting webhook notifications only");
            None
        }
    };

    // Spawn API server task
    let api_state = AppState { query, extractor };
    let api_config = config.api.clone();
    let token = shutdown.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, token).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Image indexer started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down image indexer");
    shutdown.cancel();

    if let Some(handle) = consumer_handle {
        let _ = handle.await;
    }
    let _ = api_handle.await;

    info!("Image indexer stopped");

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
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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

//! Cluster collector - Kubernetes cluster state metrics
//!
//! This binary runs as a single-replica Deployment, mirroring cluster
//! objects through watches and emitting derived metrics on an interval.

use anyhow::{Context, Result};
use collector_lib::{
    api::{self, AppState},
    cache::ObjectCache,
    emit::{HttpTransport, LogTransport, Scheduler, Transport},
    engine::MetricEngine,
    health::{components, HealthRegistry},
    observability::{CollectorMetrics, StructuredLogger},
    source::{client_for, KubeSource},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cluster-collector");

    let config = config::CollectorConfig::load()?;
    info!(
        cluster_name = %config.cluster_name,
        namespace = ?config.monitor.namespace,
        interval_secs = config.interval_secs,
        "Collector configured"
    );

    // Authentication problems are fatal at startup
    let client = client_for(config.monitor.kubernetes_api.auth_type).await?;
    let source = Arc::new(KubeSource::new(client));

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::CACHE).await;
    health_registry.register(components::ENGINE).await;
    health_registry.register(components::TRANSPORT).await;

    let metrics = CollectorMetrics::new();

    let logger = StructuredLogger::new(&config.cluster_name);
    let kinds = config.monitor.watched_kinds();
    logger.log_startup(
        COLLECTOR_VERSION,
        config.monitor.namespace.as_deref(),
        &kinds,
    );

    let cache = ObjectCache::builder()
        .source(source)
        .namespace(config.monitor.namespace.clone())
        .resync_interval(config.resync_interval())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()
        .context("Failed to build object cache")?;
    cache.start(&kinds).await;

    let engine = Arc::new(MetricEngine::new(&config.monitor));
    info!(metrics = ?engine.enabled_metrics(), "Enabled metrics");

    let transport: Arc<dyn Transport> = match &config.ingest_url {
        Some(url) => Arc::new(HttpTransport::new(url.as_str(), config.send_timeout())?),
        None => {
            info!("No ingest URL configured, writing datapoints to the log");
            Arc::new(LogTransport::new())
        }
    };

    let scheduler = Scheduler::builder()
        .cache(cache.clone())
        .engine(engine)
        .transport(transport)
        .interval(config.interval())
        .max_retries(config.max_retries)
        .send_timeout(config.send_timeout())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()
        .context("Failed to build collection scheduler")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    // Start health and metrics server
    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics));
    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Scheduler task panicked");
    }
    cache.shutdown().await;
    api_handle.abort();

    Ok(())
}

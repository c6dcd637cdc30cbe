//! Lead Express: visitor tracking and lead scoring service.
//!
//! Main entry point that wires the tracking engine and starts the server.

use clap::Parser;
use lead_api::ApiServer;
use lead_cache::LocalCache;
use lead_core::config::AppConfig;
use lead_tracking::{FieldCaptureBuffer, InMemoryVisitorStore, TrackingEngine};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(name = "lead-express")]
#[command(about = "Visitor tracking and lead scoring service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "LEAD_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "LEAD_EXPRESS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "LEAD_EXPRESS__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Resolve only by exact visitor id, never by fingerprint
    #[arg(long, default_value_t = false)]
    strict_identity: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lead_express=info,lead_tracking=info,lead_api=info,tower_http=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Lead Express starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if cli.strict_identity {
        config.tracking.fingerprint_matching = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        fingerprint_matching = config.tracking.fingerprint_matching,
        "Configuration loaded"
    );

    let store = Arc::new(InMemoryVisitorStore::new());
    let score_cache = Arc::new(LocalCache::new(
        config.cache.score_ttl_secs,
        config.cache.max_entries,
    ));
    let engine = Arc::new(
        TrackingEngine::new(store, &config.tracking).with_score_cache(score_cache.clone()),
    );
    let field_buffer = Arc::new(FieldCaptureBuffer::from_millis(
        config.tracking.field_debounce_ms,
    ));

    let api_server = ApiServer::new(config.clone(), engine.clone(), field_buffer.clone());

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Spawn field-capture flush task
    let flush_engine = engine.clone();
    let flush_buffer = field_buffer.clone();
    let flush_every = Duration::from_millis(config.tracking.field_flush_interval_ms.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_every);
        loop {
            interval.tick().await;
            if flush_buffer.is_empty() {
                continue;
            }
            let report = flush_engine.flush_field_captures(&flush_buffer, Instant::now());
            if report.applied + report.failed > 0 {
                debug!(
                    applied = report.applied,
                    failed = report.failed,
                    "Flushed field captures"
                );
            }
        }
    });

    // Spawn cache maintenance task
    let cache_for_maintenance = score_cache.clone();
    let evict_every = Duration::from_secs(config.cache.eviction_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(evict_every);
        loop {
            interval.tick().await;
            let evicted = cache_for_maintenance.evict_expired();
            if evicted > 0 {
                debug!(evicted, "Evicted expired score snapshots");
            }
        }
    });

    info!("Lead Express is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    let served = api_server.start_http().await;

    // Settle whatever the buffer still holds before exiting.
    let report = engine.flush_all_field_captures(&field_buffer);
    info!(
        applied = report.applied,
        failed = report.failed,
        "Drained field captures on shutdown"
    );

    served
}

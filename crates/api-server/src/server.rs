//! API server: tracking ingress over HTTP plus the Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post, put};
use axum::Router;
use lead_core::config::AppConfig;
use lead_tracking::{FieldCaptureBuffer, TrackingEngine};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct ApiServer {
    config: AppConfig,
    engine: Arc<TrackingEngine>,
    field_buffer: Arc<FieldCaptureBuffer>,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        engine: Arc<TrackingEngine>,
        field_buffer: Arc<FieldCaptureBuffer>,
    ) -> Self {
        Self {
            config,
            engine,
            field_buffer,
        }
    }

    /// Build the REST router. Split out so tests can drive it without binding.
    pub fn router(&self) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            field_buffer: self.field_buffer.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };

        Router::new()
            // Tracking ingress
            .route("/api/v1/track/visit", post(rest::handle_visit))
            .route("/api/v1/track/event", post(rest::handle_event))
            .route("/api/v1/track/identify", post(rest::handle_identify))
            .route("/api/v1/track/exit", post(rest::handle_exit))
            .route("/api/v1/track/field", post(rest::handle_field))
            // Lead subsystem hook
            .route("/api/v1/leads/conversion", post(rest::handle_conversion))
            // Visitor reads and admin
            .route("/api/v1/visitors/:id", get(rest::handle_get_visitor))
            .route("/api/v1/visitors/:id/score", get(rest::handle_get_score))
            .route("/api/v1/visitors/:id/consent", put(rest::handle_consent))
            .route("/api/v1/visitors/:id/status", put(rest::handle_status_override))
            // Operational endpoints
            .route("/health", get(rest::health_check))
            .route("/ready", get(rest::readiness))
            .route("/live", get(rest::liveness))
            // Middleware
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP REST server. Returns once SIGINT or SIGTERM has been
    /// received and in-flight requests have finished.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(
        &self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(
            listener,
            self.router().into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

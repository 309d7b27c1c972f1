//! Pull-based exposition server.
//!
//! Serves `GET /metrics` in the Prometheus text format and `GET /health` as
//! a liveness probe. Every scrape gathers the registry, which runs the gauge
//! callbacks against the current holder state.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::logging_layer::logging_layer;

/// Shared state for the exposition handlers.
#[derive(Clone)]
pub struct ExpositionState {
    registry: prometheus::Registry,
}

/// HTTP server exposing one Prometheus registry.
pub struct ExpositionServer {
    state: ExpositionState,
}

impl ExpositionServer {
    pub fn new(registry: prometheus::Registry) -> Self {
        Self {
            state: ExpositionState { registry },
        }
    }

    /// Create the Axum router.
    ///
    /// # Endpoints
    ///
    /// - `GET /metrics` - Prometheus text exposition
    /// - `GET /health` - always `200 OK` while the server runs
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .layer(logging_layer())
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, path = "/metrics", "Exposition server listening");
        }

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("Exposition server shutting down");
            })
            .await
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler(State(state): State<ExpositionState>) -> impl IntoResponse {
    let metric_families = state.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

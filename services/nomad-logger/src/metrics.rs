//! Prometheus metrics and the HTTP endpoint exposing them.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::{Encoder, Gauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tower_http::trace::TraceLayer;
use tracing::error;

const NAMESPACE: &str = "nomad_logger";

/// Metrics owned by the logger. Registered on a private registry so several
/// instances can coexist (e.g. in tests).
pub struct Metrics {
    registry: Registry,
    allocs: Gauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let allocs = Gauge::with_opts(
            Opts::new("allocs_processed", "Allocations seen in the last poll cycle")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(allocs.clone()))?;

        let build_info = IntGaugeVec::new(
            Opts::new("build_info", "Build information of the running logger").namespace(NAMESPACE),
            &["version"],
        )?;
        registry.register(Box::new(build_info.clone()))?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        Ok(Self { registry, allocs })
    }

    /// Record the number of allocations fetched in a poll cycle.
    pub fn set_allocation_count(&self, count: usize) {
        self.allocs.set(count as f64);
    }

    pub fn allocation_count(&self) -> f64 {
        self.allocs.get()
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Router serving `metrics_path` and `/healthz`.
pub fn router(metrics: Arc<Metrics>, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(serve_metrics))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

async fn serve_metrics(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

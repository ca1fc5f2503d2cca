//! Metrics and probe endpoints
//!
//! - `GET /metrics`: Prometheus text exposition of the operator registry
//! - `GET /healthz`: liveness, always OK while the process serves requests
//! - `GET /readyz`: OK once the controller is running

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus_client::encoding::text::encode;
use tracing::{error, info};

use crate::controller::metrics::REGISTRY;
use crate::error::{Error, Result};

/// Readiness flag shared between the controller and the probe server
#[derive(Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

pub fn router(readiness: Readiness) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(readiness)
}

pub async fn run_server(addr: SocketAddr, readiness: Readiness) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("cannot bind metrics server to {addr}: {e}")))?;
    info!("Metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, router(readiness))
        .await
        .map_err(|e| Error::ConfigError(format!("metrics server failed: {e}")))
}

async fn metrics() -> impl IntoResponse {
    let mut body = String::new();
    if let Err(e) = encode(&mut body, &REGISTRY) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
    }
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
        .into_response()
}

async fn readyz(State(readiness): State<Readiness>) -> impl IntoResponse {
    if readiness.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

//! HTTP listeners
//!
//! Client listener (default `:5000`):
//! - `/` - Index page with hits, readiness and cluster resources
//! - `/heavy`, `/slow` - Load and latency demos
//! - `/hostname` - Decorated hostname
//! - `/kubernetes/delete/{type}/{name}` - Delete a resource
//! - `/check/live`, `/check/ready`, `/metrics`
//!
//! Admin listener (default `:5001`), for trusted callers only:
//! - `/action/terminate` - Drain and exit
//! - `/malware` - Exfiltration demo
//! - `/check/live`, `/check/ready`, `/metrics`

pub mod admin;
pub mod chaos;
pub mod health;
pub mod index;
pub mod kubernetes;
pub mod metrics;
pub mod render;

use crate::state::SharedState;
use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::time::Instant;
use tracing::info;

pub fn client_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index::root_handler))
        .route("/heavy", get(chaos::heavy_handler))
        .route("/slow", get(chaos::slow_handler))
        .route("/hostname", get(chaos::hostname_handler))
        .route("/check/live", get(health::live_handler))
        .route("/check/ready", get(health::ready_handler))
        .route("/kubernetes/delete", get(kubernetes::missing_kind_handler))
        .route("/kubernetes/delete/", get(kubernetes::missing_kind_handler))
        .route("/kubernetes/delete/{*target}", get(kubernetes::delete_handler))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .with_state(state)
}

pub fn admin_router(state: SharedState) -> Router {
    Router::new()
        .route("/action/terminate", get(admin::terminate_handler))
        .route("/check/live", get(health::live_handler))
        .route("/check/ready", get(health::ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/malware", get(admin::malware_handler))
        .route_layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Prometheus scrape endpoint
async fn metrics_handler(State(state): State<SharedState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn endpoint_of(req: &Request) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string())
}

/// Request log plus duration/count metrics, client listener
async fn track_requests(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = endpoint_of(&req);
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let elapsed = started.elapsed();
    state
        .metrics
        .record_request(&method, &endpoint, elapsed.as_secs_f64());
    info!(
        listener = "client",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Request served"
    );
    response
}

/// Request log, admin listener
async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        listener = "admin",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request served"
    );
    response
}

#[cfg(test)]
#[path = "health_test.rs"]
mod tests;

#[cfg(test)]
#[path = "metrics_test.rs"]
mod metrics_tests;

#[cfg(test)]
#[path = "router_test.rs"]
mod router_tests;

//! HTTP API Module
//!
//! Small operational surface served when `--api-addr` is set.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `node`: Node record, bootstrap set view and application deployment
//! - `metrics`: Prometheus metrics endpoint

mod health;
mod metrics;
mod node;
mod state;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        // Membership
        .route("/node", get(node::get_node))
        .route("/bootstrap-peers", get(node::get_bootstrap_peers))
        .route("/applications", post(node::deploy_application))
        .with_state(state)
}

//! Health Check Endpoints
//!
//! Liveness follows the registry connection; readiness follows registration.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};
use std::time::Duration;

const REGISTRY_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Liveness probe endpoint. Verifies the registry answers.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    match tokio::time::timeout(REGISTRY_CHECK_TIMEOUT, state.registry.check_health()).await {
        Ok(Ok(())) => Ok("OK"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Registry health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            tracing::warn!("Registry health check timed out");
            Err(StatusCode::REQUEST_TIMEOUT)
        }
    }
}

/// Readiness probe endpoint. OK once the node is registered and until it stops.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.status.is_ready() {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::supervisor::NodeStatus;
    use fogmesh_core::{NodeRecord, Tier};
    use std::sync::Arc;

    fn state() -> AppState {
        AppState {
            registry: Arc::new(MemoryRegistry::new()),
            record: NodeRecord {
                id: "node-1".to_string(),
                tier: Tier::Fog,
                address: "/ip4/127.0.0.1/tcp/4001".to_string(),
            },
            capabilities: Tier::Fog.capabilities(),
            status: Arc::new(NodeStatus::default()),
            metrics_state: None,
        }
    }

    #[tokio::test]
    async fn test_health_with_memory_registry() {
        assert_eq!(health_check(State(state())).await, Ok("OK"));
    }

    #[tokio::test]
    async fn test_not_ready_before_registration() {
        assert_eq!(
            readiness_check(State(state())).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );
    }
}

//! Membership Endpoints
//!
//! Read-only views of this node and the shared bootstrap set, plus the
//! application deployment pass-through.

use super::state::AppState;
use crate::observability::metrics;
use axum::{extract::State, http::StatusCode, response::Json};
use fogmesh_core::{ApplicationRecord, Capabilities, NodeRecord};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    #[serde(flatten)]
    pub record: NodeRecord,
    pub capabilities: Capabilities,
    pub ready: bool,
}

/// GET /node
pub async fn get_node(State(state): State<AppState>) -> Json<NodeResponse> {
    Json(NodeResponse {
        record: state.record.clone(),
        capabilities: state.capabilities,
        ready: state.status.is_ready(),
    })
}

/// GET /bootstrap-peers - the registry's current bootstrap set, in order
pub async fn get_bootstrap_peers(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    state
        .registry
        .list_bootstrap_peers()
        .await
        .map(Json)
        .map_err(|e| {
            metrics::record_registry_error("list_bootstrap_peers");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Failed to read bootstrap set: {e}"),
            )
        })
}

/// POST /applications
pub async fn deploy_application(
    State(state): State<AppState>,
    Json(record): Json<ApplicationRecord>,
) -> Result<(StatusCode, Json<ApplicationRecord>), (StatusCode, String)> {
    if record.id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Application id is required".to_string()));
    }

    match state.registry.deploy_application(&record).await {
        Ok(()) => {
            tracing::info!(app_id = %record.id, name = %record.name, "Application deployed");
            Ok((StatusCode::CREATED, Json(record)))
        }
        Err(e) => {
            metrics::record_registry_error("deploy_application");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                format!("Failed to deploy application: {e}"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::supervisor::NodeStatus;
    use fogmesh_core::Tier;
    use std::sync::Arc;

    fn state(registry: Arc<MemoryRegistry>) -> AppState {
        AppState {
            registry,
            record: NodeRecord {
                id: "node-1".to_string(),
                tier: Tier::Cloud,
                address: "/ip4/127.0.0.1/tcp/4001".to_string(),
            },
            capabilities: Tier::Cloud.capabilities(),
            status: Arc::new(NodeStatus::default()),
            metrics_state: None,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_peers_view() {
        let registry = Arc::new(MemoryRegistry::with_bootstrap_peers(["a", "b"]));
        let Json(peers) = get_bootstrap_peers(State(state(registry))).await.unwrap();
        assert_eq!(peers, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_node_view_serializes_type_field() {
        let Json(node) = get_node(State(state(Arc::new(MemoryRegistry::new())))).await;
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["type"], "cloud");
        assert_eq!(value["capabilities"]["local_advertiser"], false);
        assert_eq!(value["ready"], false);
    }

    #[tokio::test]
    async fn test_deploy_application_stores_record() {
        let registry = Arc::new(MemoryRegistry::new());
        let app = ApplicationRecord {
            id: "app-1".to_string(),
            name: "telemetry".to_string(),
            description: String::new(),
            status: String::new(),
        };
        let (status, _) = deploy_application(State(state(registry.clone())), Json(app))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(registry.application("app-1").await.is_some());
    }

    #[tokio::test]
    async fn test_deploy_application_requires_id() {
        let app = ApplicationRecord {
            id: " ".to_string(),
            name: "telemetry".to_string(),
            description: String::new(),
            status: String::new(),
        };
        let err = deploy_application(State(state(Arc::new(MemoryRegistry::new()))), Json(app))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}

//! Application State
//!
//! Shared state passed to all API handlers.

use crate::observability::MetricsState;
use crate::registry::Registry;
use crate::supervisor::{Node, NodeStatus};
use fogmesh_core::{Capabilities, NodeRecord};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn Registry>,
    pub record: NodeRecord,
    pub capabilities: Capabilities,
    pub status: Arc<NodeStatus>,
    pub metrics_state: Option<MetricsState>,
}

impl AppState {
    pub fn from_node(node: &Node, metrics_state: Option<MetricsState>) -> Self {
        Self {
            registry: node.registry(),
            record: node.record().clone(),
            capabilities: node.capabilities(),
            status: node.status(),
            metrics_state,
        }
    }
}

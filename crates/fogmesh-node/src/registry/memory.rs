//! In-memory ledger.
//!
//! Same contract as the etcd backend but scoped to one process. Used when the
//! registry config selects `backend: memory` and throughout the tests.

use super::{remove_first, union_address, Registry};
use crate::error::RegistryError;
use async_trait::async_trait;
use fogmesh_core::{ApplicationRecord, NodeRecord};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Ledger {
    nodes: BTreeMap<String, NodeRecord>,
    applications: BTreeMap<String, ApplicationRecord>,
    bootstrap: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    ledger: RwLock<Ledger>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-populated with a bootstrap set, as if written by other nodes.
    pub fn with_bootstrap_peers<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bootstrap = addresses.into_iter().map(Into::into).collect();
        Self {
            ledger: RwLock::new(Ledger {
                bootstrap,
                ..Ledger::default()
            }),
        }
    }

    pub async fn bootstrap_peers(&self) -> Vec<String> {
        self.ledger.read().await.bootstrap.clone()
    }

    pub async fn node(&self, id: &str) -> Option<NodeRecord> {
        self.ledger.read().await.nodes.get(id).cloned()
    }

    pub async fn application(&self, id: &str) -> Option<ApplicationRecord> {
        self.ledger.read().await.applications.get(id).cloned()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register_node(&self, record: &NodeRecord) -> Result<(), RegistryError> {
        let mut ledger = self.ledger.write().await;
        ledger.nodes.insert(record.id.clone(), record.clone());
        if record.tier.contributes_to_bootstrap() {
            let added = union_address(&mut ledger.bootstrap, &record.address);
            debug!(address = %record.address, added, "Bootstrap set union");
        }
        Ok(())
    }

    async fn list_bootstrap_peers(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.ledger.read().await.bootstrap.clone())
    }

    async fn remove_bootstrap_peer(&self, address: &str) -> Result<(), RegistryError> {
        let removed = remove_first(&mut self.ledger.write().await.bootstrap, address);
        debug!(address, removed, "Bootstrap set removal");
        Ok(())
    }

    async fn deploy_application(&self, record: &ApplicationRecord) -> Result<(), RegistryError> {
        self.ledger
            .write()
            .await
            .applications
            .insert(record.id.clone(), record.clone());
        Ok(())
    }
}

//! Registry Client
//!
//! CRUD facade over the external ledger holding node records, application
//! records and the shared bootstrap set.
//!
//! Every write may fail after the ledger has committed it, so callers treat
//! an error as "unknown outcome". All operations tolerate being repeated:
//! registering twice never duplicates a bootstrap address and removing an
//! absent address is a no-op.

mod config;
mod etcd;
mod memory;

pub use config::{ConnectBackoff, RegistryBackend, RegistryConfig};
pub use etcd::EtcdRegistry;
pub use memory::MemoryRegistry;

use crate::error::RegistryError;
use async_trait::async_trait;
use fogmesh_core::{ApplicationRecord, NodeRecord};
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait Registry: Send + Sync {
    /// Upserts `record` by ID. Fog and Cloud records additionally union their
    /// address into the bootstrap set.
    async fn register_node(&self, record: &NodeRecord) -> Result<(), RegistryError>;

    /// The bootstrap set in ledger order.
    async fn list_bootstrap_peers(&self) -> Result<Vec<String>, RegistryError>;

    /// Removes the first exact match of `address`. Absent addresses succeed.
    async fn remove_bootstrap_peer(&self, address: &str) -> Result<(), RegistryError>;

    /// Stores an application record. Never read by membership logic.
    async fn deploy_application(&self, record: &ApplicationRecord) -> Result<(), RegistryError>;

    /// Cheap reachability check used by readiness probes.
    async fn check_health(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Connects to the backend named in `config`.
pub async fn connect(config: &RegistryConfig) -> Result<Arc<dyn Registry>, RegistryError> {
    match config.backend {
        RegistryBackend::Etcd => {
            let registry = EtcdRegistry::connect(config).await?;
            info!(
                endpoints = ?config.endpoints,
                namespace = %config.namespace,
                "Connected to etcd registry"
            );
            Ok(Arc::new(registry))
        }
        RegistryBackend::Memory => {
            info!("Using in-memory registry, bootstrap set is not shared");
            Ok(Arc::new(MemoryRegistry::new()))
        }
    }
}

/// Appends `address` unless already present. Returns whether the set changed.
pub(crate) fn union_address(set: &mut Vec<String>, address: &str) -> bool {
    if set.iter().any(|existing| existing == address) {
        return false;
    }
    set.push(address.to_string());
    true
}

/// Removes the first exact match of `address`. Returns whether the set changed.
pub(crate) fn remove_first(set: &mut Vec<String>, address: &str) -> bool {
    match set.iter().position(|existing| existing == address) {
        Some(index) => {
            set.remove(index);
            true
        }
        None => false,
    }
}

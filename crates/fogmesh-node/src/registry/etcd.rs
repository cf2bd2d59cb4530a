//! Etcd-backed ledger
//!
//! Layout under `/{namespace}/`:
//! - `nodes/{id}`: NodeRecord JSON
//! - `apps/{id}`: ApplicationRecord JSON
//! - `bootstrap-peers`: JSON array of addresses
//!
//! The bootstrap set is one key shared by every node, so each change is a
//! read-modify-write committed only if the key's revision is unchanged.

use super::config::RegistryConfig;
use super::{remove_first, union_address, Registry};
use crate::error::RegistryError;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{Client, Compare, CompareOp, Txn, TxnOp};
use fogmesh_core::{ApplicationRecord, NodeRecord};
use tracing::{debug, info, warn};

/// Key builder for one namespace.
#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn new(namespace: &str) -> Self {
        Self {
            prefix: format!("/{namespace}/"),
        }
    }

    fn node(&self, id: &str) -> String {
        format!("{}nodes/{}", self.prefix, id)
    }

    fn application(&self, id: &str) -> String {
        format!("{}apps/{}", self.prefix, id)
    }

    fn bootstrap_peers(&self) -> String {
        format!("{}bootstrap-peers", self.prefix)
    }
}

/// Current bootstrap set plus the revision it was read at (`None` if absent).
struct Snapshot {
    peers: Vec<String>,
    mod_revision: Option<i64>,
}

pub struct EtcdRegistry {
    client: Client,
    keys: Keys,
    max_write_attempts: u32,
}

impl EtcdRegistry {
    /// Connect to etcd with exponential backoff
    pub async fn connect(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let backoff = ExponentialBackoff {
            initial_interval: config.connect.initial(),
            max_interval: config.connect.max(),
            max_elapsed_time: Some(config.connect.max_elapsed()),
            ..Default::default()
        };

        let endpoints = config.endpoints.clone();
        let client = retry(backoff, || async {
            match Client::connect(&endpoints, None).await {
                Ok(client) => {
                    debug!("Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| RegistryError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            keys: Keys::new(&config.namespace),
            max_write_attempts: config.max_write_attempts,
        })
    }

    async fn read_bootstrap(&self) -> Result<Snapshot, RegistryError> {
        let key = self.keys.bootstrap_peers();
        let response = self.client.clone().get(key.as_str(), None).await?;

        let Some(kv) = response.kvs().first() else {
            return Ok(Snapshot {
                peers: Vec::new(),
                mod_revision: None,
            });
        };

        let peers = serde_json::from_slice(kv.value()).map_err(|e| RegistryError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        Ok(Snapshot {
            peers,
            mod_revision: Some(kv.mod_revision()),
        })
    }

    /// Applies `mutate` to the bootstrap set under optimistic concurrency.
    /// Returns whether a write was committed; no write is issued when
    /// `mutate` reports no change.
    async fn update_bootstrap<F>(&self, mutate: F) -> Result<bool, RegistryError>
    where
        F: Fn(&mut Vec<String>) -> bool + Send + Sync,
    {
        let key = self.keys.bootstrap_peers();

        for attempt in 1..=self.max_write_attempts {
            let mut snapshot = self.read_bootstrap().await?;
            if !mutate(&mut snapshot.peers) {
                return Ok(false);
            }

            let guard = match snapshot.mod_revision {
                Some(revision) => Compare::mod_revision(key.as_str(), CompareOp::Equal, revision),
                None => Compare::create_revision(key.as_str(), CompareOp::Equal, 0),
            };
            let value = serde_json::to_vec(&snapshot.peers)?;
            let txn = Txn::new()
                .when(vec![guard])
                .and_then(vec![TxnOp::put(key.as_str(), value, None)]);

            if self.client.clone().txn(txn).await?.succeeded() {
                return Ok(true);
            }
            debug!(key = %key, attempt, "Bootstrap set changed concurrently, retrying");
        }

        Err(RegistryError::Conflict {
            key,
            attempts: self.max_write_attempts,
        })
    }
}

#[async_trait]
impl Registry for EtcdRegistry {
    async fn register_node(&self, record: &NodeRecord) -> Result<(), RegistryError> {
        let value = serde_json::to_vec(record)?;
        self.client
            .clone()
            .put(self.keys.node(&record.id), value, None)
            .await?;

        if record.tier.contributes_to_bootstrap() {
            let address = record.address.as_str();
            let added = self
                .update_bootstrap(|peers| union_address(peers, address))
                .await?;
            info!(address = %record.address, added, "Bootstrap set union committed");
        }
        Ok(())
    }

    async fn list_bootstrap_peers(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.read_bootstrap().await?.peers)
    }

    async fn remove_bootstrap_peer(&self, address: &str) -> Result<(), RegistryError> {
        let removed = self
            .update_bootstrap(|peers| remove_first(peers, address))
            .await?;
        debug!(address, removed, "Bootstrap set removal");
        Ok(())
    }

    async fn deploy_application(&self, record: &ApplicationRecord) -> Result<(), RegistryError> {
        let value = serde_json::to_vec(record)?;
        self.client
            .clone()
            .put(self.keys.application(&record.id), value, None)
            .await?;
        Ok(())
    }

    async fn check_health(&self) -> Result<(), RegistryError> {
        self.client
            .clone()
            .status()
            .await
            .map(|_| ())
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keys::new("fogmesh");
        assert_eq!(keys.node("12D3KooW"), "/fogmesh/nodes/12D3KooW");
        assert_eq!(keys.application("app-7"), "/fogmesh/apps/app-7");
        assert_eq!(keys.bootstrap_peers(), "/fogmesh/bootstrap-peers");
    }

    #[test]
    fn test_namespaces_do_not_overlap() {
        let a = Keys::new("mesh-a");
        let b = Keys::new("mesh-ab");
        assert!(!b.bootstrap_peers().starts_with(&a.prefix));
    }

    #[test]
    fn test_bootstrap_value_is_json_array() {
        let peers = vec!["/ip4/1.2.3.4/tcp/1".to_string()];
        let encoded = serde_json::to_vec(&peers).unwrap();
        assert_eq!(encoded, br#"["/ip4/1.2.3.4/tcp/1"]"#);
    }
}

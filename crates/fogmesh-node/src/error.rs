//! Error Taxonomy
//!
//! Every failure a node can observe falls into one of four classes. Whether a
//! failure is fatal depends on where it is raised, not on its class alone:
//!
//! - `ConfigError` is always fatal and raised before the node starts.
//! - `TransportError` is fatal during host construction/bind and per-peer
//!   during reconciliation probing.
//! - `RegistryError` is fatal during initial registration and abandons only
//!   the current tick during reconciliation.
//! - `DiscoveryError` is never fatal.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid listen address `{address}`: {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("invalid external address `{address}`: {reason}")]
    InvalidExternalAddress { address: String, reason: String },

    #[error("invalid seed bootstrap address `{address}`: {reason}")]
    InvalidSeedAddress { address: String, reason: String },

    #[error("failed to read registry config `{}`: {source}", path.display())]
    ReadRegistryConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry config `{}`: {source}", path.display())]
    ParseRegistryConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid registry config: {0}")]
    InvalidRegistryConfig(String),
}

/// Failure in the libp2p transport or host.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build libp2p swarm: {0}")]
    Build(String),

    #[error("failed to listen on {address}: {reason}")]
    Listen { address: String, reason: String },

    #[error("no listen address reported within {0:?}")]
    NoListenAddress(Duration),

    #[error("dial failed: {0}")]
    Dial(String),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to start mDNS: {0}")]
    LocalDiscovery(String),

    #[error("transport host is shut down")]
    HostClosed,
}

/// Failure reported by the external ledger.
///
/// A failed write leaves the ledger in an unknown state: it may have
/// committed even though the caller observed an error.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    #[error("failed to connect to registry: {0}")]
    Connect(String),

    #[error("failed to encode or decode registry value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt registry value at `{key}`: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("write to `{key}` lost {attempts} consecutive concurrency races")]
    Conflict { key: String, attempts: u32 },

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Failure in a discovery adapter. Logged, never fatal.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("distributed table is not running")]
    TableStopped,

    #[error("transport host is shut down")]
    HostClosed,
}

/// Umbrella error for node construction and startup.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_preserves_class() {
        let err: NodeError = RegistryError::Unavailable("ledger offline".to_string()).into();
        assert!(matches!(err, NodeError::Registry(_)));
        assert_eq!(
            err.to_string(),
            "registry error: registry unavailable: ledger offline"
        );

        let err: NodeError = TransportError::HostClosed.into();
        assert!(matches!(err, NodeError::Transport(_)));
    }
}

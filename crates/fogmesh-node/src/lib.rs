//! Fogmesh Node Library
//!
//! Membership and bootstrap reconciliation for a tiered IoT/Fog/Cloud mesh.
//! A node discovers peers over mDNS and/or Kademlia depending on its tier,
//! registers itself in a shared ledger and keeps the ledger's bootstrap set
//! pruned to addresses that are actually reachable.

pub mod api;
pub mod config;
pub mod error;
pub mod network;
pub mod observability;
pub mod reconcile;
pub mod registry;
pub mod supervisor;
pub mod version;

pub use config::NodeConfig;
pub use error::{ConfigError, DiscoveryError, NodeError, RegistryError, TransportError};
pub use supervisor::{Node, NodeStatus};

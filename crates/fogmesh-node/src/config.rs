//! Node Configuration
//!
//! Validated process configuration. Built from CLI arguments in `main`;
//! every field is already parsed, so constructing a node cannot fail on
//! malformed input.

use crate::error::ConfigError;
use crate::network::{NetworkConfig, PeerDescriptor};
use fogmesh_core::Tier;
use libp2p::Multiaddr;

pub const DEFAULT_LISTEN_ADDRESS: &str = "/ip4/0.0.0.0/tcp/0";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub tier: Tier,
    pub listen: Multiaddr,
    /// Initial routing peers. Empty makes this node a table anchor.
    pub seeds: Vec<PeerDescriptor>,
    /// Address published to the registry instead of the bound one.
    pub external_address: Option<Multiaddr>,
    pub network: NetworkConfig,
}

impl NodeConfig {
    pub fn new(tier: Tier, listen: Multiaddr) -> Self {
        Self {
            tier,
            listen,
            seeds: Vec::new(),
            external_address: None,
            network: NetworkConfig::default(),
        }
    }

    pub fn with_seeds(mut self, seeds: Vec<PeerDescriptor>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_external_address(mut self, address: Option<Multiaddr>) -> Self {
        self.external_address = address;
        self
    }

    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }
}

pub fn parse_listen_address(raw: &str) -> Result<Multiaddr, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e: libp2p::multiaddr::Error| ConfigError::InvalidListenAddress {
            address: raw.to_string(),
            reason: e.to_string(),
        })
}

pub fn parse_external_address(raw: &str) -> Result<Multiaddr, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e: libp2p::multiaddr::Error| ConfigError::InvalidExternalAddress {
            address: raw.to_string(),
            reason: e.to_string(),
        })
}

/// Parses a comma-separated list of `/p2p`-suffixed multiaddrs. Blank
/// entries are skipped; any malformed entry rejects the whole list.
pub fn parse_seed_list(raw: &str) -> Result<Vec<PeerDescriptor>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            PeerDescriptor::parse(entry).map_err(|e| ConfigError::InvalidSeedAddress {
                address: entry.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

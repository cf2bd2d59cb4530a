//! P2P Network Module
//!
//! Transport host and the two discovery mechanisms layered on it.
//!
//! This module contains:
//! - `swarm`: libp2p swarm construction and the event loop that owns it
//! - `host`: cloneable handle for driving the swarm
//! - `advertiser`: LAN discovery over mDNS (Local Advertiser)
//! - `table`: Kademlia routing table (Distributed Table)
//! - `descriptor`: `/p2p`-suffixed peer addresses as stored in the registry

pub mod advertiser;
pub mod behaviour;
pub mod config;
pub mod descriptor;
pub mod host;
pub mod swarm;
pub mod table;

pub use advertiser::LocalAdvertiser;
pub use behaviour::{FogmeshBehaviour, TableMode};
pub use config::NetworkConfig;
pub use descriptor::{DescriptorError, PeerDescriptor};
pub use host::{spawn_host, HostHandle};
pub use swarm::{DiscoveredPeer, SwarmCommand};
pub use table::{DistributedTable, RoutingTable};

/// Deployment service name. Nodes only talk to peers announcing the same one.
pub const SERVICE_NAME: &str = "fog-computing";

/// Identify protocol version, derived from the service name.
pub const PROTOCOL_VERSION: &str = "/fog-computing/1.0.0";

/// Kademlia protocol name, scoped to the service so unrelated DHTs never merge.
pub const KADEMLIA_PROTOCOL: &str = "/fog-computing/kad/1.0.0";

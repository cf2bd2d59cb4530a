//! libp2p NetworkBehaviour Configuration
//!
//! Combines the protocols a node may run into a single network behaviour:
//! - Identify: Peer information exchange, carries the deployment service name
//! - mDNS: LAN-scoped discovery (Local Advertiser, IoT and Fog tiers)
//! - Kademlia: Global routing table (Distributed Table, Fog and Cloud tiers)
//!
//! Optional protocols are wrapped in `Toggle`. Kademlia is fixed by the tier's
//! capability set when the swarm is built. mDNS only exists while the Local
//! Advertiser runs, so a stopped advertiser neither queries nor answers.

use super::config::NetworkConfig;
use super::{KADEMLIA_PROTOCOL, PROTOCOL_VERSION};
use crate::version;
use fogmesh_core::Capabilities;
use libp2p::core::transport::ListenerId;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::{ExpiredListenAddr, FromSwarm, NewListenAddr};
use libp2p::{identify, kad, mdns, swarm::NetworkBehaviour, Multiaddr, PeerId, StreamProtocol};

/// Whether the distributed table starts as a joinable anchor or as a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    /// No seed peers were configured: serve routing queries from the start.
    Anchor,
    /// Seed peers were configured: let libp2p pick client/server from reachability.
    Client,
}

impl TableMode {
    pub fn for_seed_count(seeds: usize) -> Self {
        if seeds == 0 {
            TableMode::Anchor
        } else {
            TableMode::Client
        }
    }
}

/// Combined network behaviour for mesh nodes.
#[derive(NetworkBehaviour)]
pub struct FogmeshBehaviour {
    pub identify: identify::Behaviour,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    pub kademlia: Toggle<kad::Behaviour<kad::store::MemoryStore>>,
}

impl FogmeshBehaviour {
    pub fn new(
        local_public_key: libp2p::identity::PublicKey,
        capabilities: Capabilities,
        table_mode: TableMode,
        config: &NetworkConfig,
    ) -> Self {
        let local_peer_id = local_public_key.to_peer_id();

        let identify = identify::Behaviour::new(
            identify::Config::new(PROTOCOL_VERSION.to_string(), local_public_key)
                .with_agent_version(version::agent_version()),
        );

        let kademlia = if capabilities.distributed_table {
            Some(build_kademlia(local_peer_id, table_mode, config))
        } else {
            None
        };

        Self {
            identify,
            mdns: Toggle::from(None),
            kademlia: Toggle::from(kademlia),
        }
    }

    /// Starts mDNS. The fresh behaviour missed the swarm's listen events, so
    /// the current listen addresses are replayed into it.
    pub fn enable_mdns(
        &mut self,
        local_peer_id: PeerId,
        listen_addrs: &[(ListenerId, Multiaddr)],
    ) -> Result<(), std::io::Error> {
        if self.mdns.is_enabled() {
            return Ok(());
        }

        let mut mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;
        for (listener_id, addr) in listen_addrs {
            mdns.on_swarm_event(FromSwarm::NewListenAddr(NewListenAddr {
                listener_id: *listener_id,
                addr,
            }));
        }
        self.mdns = Toggle::from(Some(mdns));
        Ok(())
    }

    /// Stops mDNS. Returns whether it was running.
    ///
    /// Interface tasks of the dropped behaviour linger until their next
    /// received packet; expiring every address first leaves them with
    /// nothing to announce.
    pub fn disable_mdns(&mut self, listen_addrs: &[(ListenerId, Multiaddr)]) -> bool {
        let Some(mdns) = self.mdns.as_mut() else {
            return false;
        };
        for (listener_id, addr) in listen_addrs {
            mdns.on_swarm_event(FromSwarm::ExpiredListenAddr(ExpiredListenAddr {
                listener_id: *listener_id,
                addr,
            }));
        }
        self.mdns = Toggle::from(None);
        true
    }

    pub fn mdns_enabled(&self) -> bool {
        self.mdns.is_enabled()
    }
}

fn build_kademlia(
    local_peer_id: PeerId,
    table_mode: TableMode,
    config: &NetworkConfig,
) -> kad::Behaviour<kad::store::MemoryStore> {
    let store = kad::store::MemoryStore::new(local_peer_id);
    let mut kad_config = kad::Config::new(StreamProtocol::new(KADEMLIA_PROTOCOL));
    // Entries are only ever added by the event loop, which gates them on the
    // table being active.
    kad_config
        .set_query_timeout(config.kademlia_query_timeout)
        .set_parallelism(config.kademlia_parallelism)
        .set_kbucket_inserts(kad::BucketInserts::Manual);

    let mut kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);
    match table_mode {
        TableMode::Anchor => kademlia.set_mode(Some(kad::Mode::Server)),
        TableMode::Client => kademlia.set_mode(None),
    }
    kademlia
}

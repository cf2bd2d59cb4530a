//! Distributed Table
//!
//! Kademlia routing over the shared host. With no seed peers the table acts
//! as an anchor that other nodes join; otherwise it starts as a client and
//! pre-populates routing with the seeds.

use super::behaviour::TableMode;
use super::descriptor::PeerDescriptor;
use super::host::HostHandle;
use super::swarm::short_id;
use crate::error::{DiscoveryError, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Operations the reconciler needs from the routing layer.
#[async_trait]
pub trait RoutingTable: Send + Sync {
    /// Re-triggers routing convergence. Safe to call repeatedly.
    async fn bootstrap(&self) -> Result<(), DiscoveryError>;

    /// Directly connects to a candidate peer within `timeout`.
    async fn connect(&self, peer: &PeerDescriptor, timeout: Duration)
        -> Result<(), TransportError>;
}

pub struct DistributedTable {
    host: HostHandle,
    seeds: Vec<PeerDescriptor>,
    mode: TableMode,
}

impl DistributedTable {
    pub fn new(host: HostHandle, seeds: Vec<PeerDescriptor>) -> Self {
        let mode = TableMode::for_seed_count(seeds.len());
        Self { host, seeds, mode }
    }

    pub fn mode(&self) -> TableMode {
        self.mode
    }

    /// Activates routing and inserts the seed peers.
    pub async fn start(&self) -> Result<(), TransportError> {
        self.host.set_routing(true).await?;
        for seed in &self.seeds {
            self.host
                .add_address(seed.peer_id, seed.address.clone())
                .await?;
        }

        info!(
            mode = ?self.mode,
            seeds = self.seeds.len(),
            "Distributed table started"
        );
        Ok(())
    }

    /// Deactivates routing and drops every routing entry.
    pub async fn stop(&self) {
        match self.host.set_routing(false).await {
            Ok(()) => debug!("Distributed table stopped"),
            Err(e) => debug!(error = %e, "Host already closed while stopping table"),
        }
    }
}

#[async_trait]
impl RoutingTable for DistributedTable {
    async fn bootstrap(&self) -> Result<(), DiscoveryError> {
        self.host.bootstrap().await
    }

    async fn connect(
        &self,
        peer: &PeerDescriptor,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.host.connect(peer, timeout).await?;
        // A reachable bootstrap peer is worth keeping in routing even if the
        // connection later idles out.
        self.host
            .add_address(peer.peer_id, peer.address.clone())
            .await?;
        debug!(peer_id_short = short_id(&peer.peer_id), "Bootstrap peer reachable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::swarm::SwarmCommand;
    use libp2p::identity::Keypair;
    use libp2p::{Multiaddr, PeerId};
    use tokio::sync::mpsc;

    fn random_peer() -> PeerId {
        PeerId::from(Keypair::generate_ed25519().public())
    }

    fn host() -> (HostHandle, mpsc::Receiver<SwarmCommand>) {
        let (tx, rx) = mpsc::channel(16);
        let listen: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        (HostHandle::new(random_peer(), listen, tx), rx)
    }

    #[tokio::test]
    async fn test_start_activates_routing_and_seeds() {
        let (host, mut rx) = host();
        let seed = PeerDescriptor::new(random_peer(), "/ip4/10.0.0.1/tcp/4001".parse().unwrap());
        let table = DistributedTable::new(host, vec![seed.clone()]);
        assert_eq!(table.mode(), TableMode::Client);

        table.start().await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(SwarmCommand::SetRouting { active: true })
        ));
        match rx.recv().await {
            Some(SwarmCommand::AddAddress { peer_id, address }) => {
                assert_eq!(peer_id, seed.peer_id);
                assert_eq!(address, seed.address);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        table.stop().await;
        assert!(matches!(
            rx.recv().await,
            Some(SwarmCommand::SetRouting { active: false })
        ));
    }

    #[tokio::test]
    async fn test_no_seeds_means_anchor() {
        let (host, _rx) = host();
        let table = DistributedTable::new(host, Vec::new());
        assert_eq!(table.mode(), TableMode::Anchor);
    }

    #[tokio::test]
    async fn test_bootstrap_after_host_closed() {
        let (host, rx) = host();
        drop(rx);
        let table = DistributedTable::new(host, Vec::new());
        assert!(matches!(
            table.bootstrap().await,
            Err(DiscoveryError::HostClosed)
        ));
    }
}

//! Transport Host
//!
//! `HostHandle` is the cheap, cloneable face of the swarm task. The
//! advertiser, the table, the supervisor and the reconciler all share one
//! host through clones of the handle.

use super::behaviour::TableMode;
use super::config::NetworkConfig;
use super::descriptor::PeerDescriptor;
use super::swarm::{build_swarm, spawn_event_loop, DiscoveredPeer, SwarmCommand};
use crate::error::{DiscoveryError, TransportError};
use fogmesh_core::Capabilities;
use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::time::Duration;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct HostHandle {
    local_peer_id: PeerId,
    listen_addr: Multiaddr,
    commands: mpsc::Sender<SwarmCommand>,
}

impl HostHandle {
    /// Wraps an already running swarm task.
    pub fn new(
        local_peer_id: PeerId,
        listen_addr: Multiaddr,
        commands: mpsc::Sender<SwarmCommand>,
    ) -> Self {
        Self {
            local_peer_id,
            listen_addr,
            commands,
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Bound address other machines can reach, see `select_listen_address`.
    pub fn listen_addr(&self) -> &Multiaddr {
        &self.listen_addr
    }

    /// The address other nodes should dial: `external` if set, otherwise the
    /// listen address, always suffixed with this node's peer ID.
    pub fn advertised_address(&self, external: Option<&Multiaddr>) -> String {
        let base = external.unwrap_or(&self.listen_addr);
        PeerDescriptor::new(self.local_peer_id, base.clone()).to_string()
    }

    /// Connects to `peer`, failing if no connection is up within `timeout`.
    pub async fn connect(
        &self,
        peer: &PeerDescriptor,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.connect_peer(peer.peer_id, vec![peer.address.clone()], timeout)
            .await
    }

    pub async fn connect_peer(
        &self,
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::Dial {
            peer_id,
            addresses,
            reply,
        })
        .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::HostClosed),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }

    pub async fn add_address(
        &self,
        peer_id: PeerId,
        address: Multiaddr,
    ) -> Result<(), TransportError> {
        self.send(SwarmCommand::AddAddress { peer_id, address })
            .await
    }

    pub async fn bootstrap(&self) -> Result<(), DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SwarmCommand::Bootstrap { reply })
            .await
            .map_err(|_| DiscoveryError::HostClosed)?;
        rx.await.map_err(|_| DiscoveryError::HostClosed)?
    }

    pub async fn set_routing(&self, active: bool) -> Result<(), TransportError> {
        self.send(SwarmCommand::SetRouting { active }).await
    }

    /// Starts mDNS with `sink` receiving its discoveries, or stops it on `None`.
    pub async fn set_advertising(
        &self,
        sink: Option<mpsc::UnboundedSender<DiscoveredPeer>>,
    ) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::SetAdvertising { sink, reply }).await?;
        rx.await.map_err(|_| TransportError::HostClosed)?
    }

    pub async fn routing_peer_count(&self) -> Result<usize, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::RoutingPeers { reply }).await?;
        rx.await.map_err(|_| TransportError::HostClosed)
    }

    /// Shuts the swarm down. Closing an already closed host succeeds.
    pub async fn close(&self) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(SwarmCommand::Close { reply })
            .await
            .is_err()
        {
            debug!("Transport host already closed");
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: SwarmCommand) -> Result<(), TransportError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TransportError::HostClosed)
    }
}

/// Builds the swarm, starts its event loop, and waits for a listen address.
/// Discovery protocols stay idle until the advertiser or table activates them.
///
/// A wildcard bind reports one address per interface, loopback usually first,
/// so the host waits up to `listen_settle_timeout` for a routable one.
pub async fn spawn_host(
    listen: &Multiaddr,
    capabilities: Capabilities,
    table_mode: TableMode,
    config: &NetworkConfig,
) -> Result<HostHandle, TransportError> {
    let swarm = build_swarm(listen, capabilities, table_mode, config)?;
    let local_peer_id = *swarm.local_peer_id();

    let (commands, command_rx) = mpsc::channel(config.command_buffer);
    let (listen_tx, listen_rx) = oneshot::channel();
    let (addrs_tx, mut addrs_rx) = watch::channel(Vec::new());
    spawn_event_loop(swarm, command_rx, listen_tx, addrs_tx);

    let first = match tokio::time::timeout(config.listen_wait_timeout, listen_rx).await {
        Ok(Ok(Ok(address))) => address,
        Ok(Ok(Err(e))) => {
            close_quietly(&commands).await;
            return Err(e);
        }
        Ok(Err(_)) => return Err(TransportError::HostClosed),
        Err(_) => {
            close_quietly(&commands).await;
            return Err(TransportError::NoListenAddress(config.listen_wait_timeout));
        }
    };

    let listen_addr = if is_wildcard(listen) && !is_routable(&first) {
        let found = tokio::time::timeout(
            config.listen_settle_timeout,
            addrs_rx.wait_for(|addrs| addrs.iter().any(is_routable)),
        )
        .await
        .is_ok_and(|seen| seen.is_ok());
        if !found {
            warn!(address = %first, "No routable listen address, advertising loopback");
        }
        let bound = addrs_rx.borrow().clone();
        select_listen_address(&bound).cloned().unwrap_or(first)
    } else {
        first
    };

    info!(
        peer_id = %local_peer_id,
        listen_addr = %listen_addr.clone().with(Protocol::P2p(local_peer_id)),
        "Transport host started"
    );

    Ok(HostHandle::new(local_peer_id, listen_addr, commands))
}

/// Picks the address to advertise from everything the swarm is bound to: the
/// first routable one, otherwise the first one.
pub(crate) fn select_listen_address(addrs: &[Multiaddr]) -> Option<&Multiaddr> {
    addrs
        .iter()
        .find(|addr| is_routable(addr))
        .or_else(|| addrs.first())
}

/// False for loopback, unspecified and link-local IPs. Names are assumed
/// routable.
fn is_routable(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => routable_v4(ip),
        Some(Protocol::Ip6(ip)) => routable_v6(ip),
        _ => true,
    }
}

fn routable_v4(ip: Ipv4Addr) -> bool {
    !(ip.is_loopback() || ip.is_unspecified() || ip.is_link_local())
}

fn routable_v6(ip: Ipv6Addr) -> bool {
    let link_local = ip.segments()[0] & 0xffc0 == 0xfe80;
    !(ip.is_loopback() || ip.is_unspecified() || link_local)
}

fn is_wildcard(addr: &Multiaddr) -> bool {
    match addr.iter().next() {
        Some(Protocol::Ip4(ip)) => ip.is_unspecified(),
        Some(Protocol::Ip6(ip)) => ip.is_unspecified(),
        _ => false,
    }
}

async fn close_quietly(commands: &mpsc::Sender<SwarmCommand>) {
    let (reply, rx) = oneshot::channel();
    if commands.send(SwarmCommand::Close { reply }).await.is_ok() {
        let _ = rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use fogmesh_core::Tier;
    use libp2p::identity::Keypair;

    fn random_peer() -> PeerId {
        PeerId::from(Keypair::generate_ed25519().public())
    }

    fn handle() -> (HostHandle, mpsc::Receiver<SwarmCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let listen: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        (HostHandle::new(random_peer(), listen, tx), rx)
    }

    fn addrs(raw: &[&str]) -> Vec<Multiaddr> {
        raw.iter().map(|a| a.parse().unwrap()).collect()
    }

    async fn loopback_host() -> HostHandle {
        let listen: Multiaddr = "/ip4/127.0.0.1/tcp/0".parse().unwrap();
        spawn_host(
            &listen,
            Tier::Cloud.capabilities(),
            TableMode::Anchor,
            &NetworkConfig::default(),
        )
        .await
        .unwrap()
    }

    fn descriptor_of(host: &HostHandle) -> PeerDescriptor {
        PeerDescriptor::new(host.local_peer_id(), host.listen_addr().clone())
    }

    #[test]
    fn test_advertised_address_prefers_external() {
        let (host, _rx) = handle();
        let local = host.advertised_address(None);
        assert_eq!(
            local,
            format!("/ip4/127.0.0.1/tcp/4001/p2p/{}", host.local_peer_id())
        );

        let external: Multiaddr = "/dns4/fog.example.net/tcp/4001".parse().unwrap();
        let public = host.advertised_address(Some(&external));
        assert!(public.starts_with("/dns4/fog.example.net/tcp/4001/p2p/"));
        assert!(PeerDescriptor::parse(&public).is_ok());
    }

    #[test]
    fn test_select_listen_address_skips_loopback() {
        let bound = addrs(&[
            "/ip4/127.0.0.1/tcp/36181",
            "/ip4/169.254.3.1/tcp/36181",
            "/ip6/fe80::1/tcp/36181",
            "/ip4/192.0.2.2/tcp/36181",
            "/ip4/10.1.0.4/tcp/36181",
        ]);
        assert_eq!(select_listen_address(&bound), Some(&bound[3]));

        let v6 = addrs(&["/ip6/::1/tcp/4001", "/ip6/2001:db8::7/tcp/4001"]);
        assert_eq!(select_listen_address(&v6), Some(&v6[1]));
    }

    #[test]
    fn test_select_listen_address_falls_back_to_loopback() {
        let bound = addrs(&["/ip4/127.0.0.1/tcp/4001", "/ip6/::1/tcp/4001"]);
        assert_eq!(select_listen_address(&bound), Some(&bound[0]));
        assert_eq!(select_listen_address(&[]), None);
    }

    #[test]
    fn test_wildcard_detection() {
        assert!(is_wildcard(&"/ip4/0.0.0.0/tcp/0".parse().unwrap()));
        assert!(is_wildcard(&"/ip6/::/tcp/0".parse().unwrap()));
        assert!(!is_wildcard(&"/ip4/127.0.0.1/tcp/0".parse().unwrap()));
        assert!(is_routable(&"/dns4/fog-1/tcp/4001".parse().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out_when_unanswered() {
        let (host, mut rx) = handle();
        let holder = tokio::spawn(async move {
            // Keep the reply sender alive without answering.
            let command = rx.recv().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(command);
        });

        let peer = PeerDescriptor::new(random_peer(), "/ip4/10.0.0.9/tcp/1".parse().unwrap());
        let result = host.connect(&peer, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        holder.abort();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (host, rx) = handle();
        drop(rx);
        assert!(host.close().await.is_ok());
        assert!(host.close().await.is_ok());
        assert!(matches!(
            host.set_routing(true).await,
            Err(TransportError::HostClosed)
        ));
    }

    #[tokio::test]
    async fn test_dial_outcomes_between_real_hosts() {
        let anchor = loopback_host().await;
        let joiner = loopback_host().await;
        let timeout = Duration::from_secs(10);

        joiner.connect(&descriptor_of(&anchor), timeout).await.unwrap();

        // The noise handshake proves the listener is someone else.
        let impostor = PeerDescriptor::new(random_peer(), anchor.listen_addr().clone());
        assert!(matches!(
            joiner.connect(&impostor, timeout).await,
            Err(TransportError::Dial(_))
        ));

        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let dead = PeerDescriptor::new(
            random_peer(),
            format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap(),
        );
        assert!(matches!(
            joiner.connect(&dead, timeout).await,
            Err(TransportError::Dial(_))
        ));

        joiner.close().await.unwrap();
        anchor.close().await.unwrap();
        assert!(matches!(
            joiner.connect(&descriptor_of(&anchor), timeout).await,
            Err(TransportError::HostClosed)
        ));
    }

    #[tokio::test]
    async fn test_routing_lifecycle_on_real_host() {
        let anchor = loopback_host().await;
        let joiner = loopback_host().await;

        assert!(matches!(
            anchor.bootstrap().await,
            Err(DiscoveryError::TableStopped)
        ));
        anchor.set_routing(true).await.unwrap();
        // Nobody to converge with yet.
        anchor.bootstrap().await.unwrap();
        assert_eq!(anchor.routing_peer_count().await.unwrap(), 0);

        joiner.set_routing(true).await.unwrap();
        joiner
            .connect(&descriptor_of(&anchor), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(joiner.routing_peer_count().await.unwrap(), 1);
        joiner.bootstrap().await.unwrap();

        joiner.set_routing(false).await.unwrap();
        assert_eq!(joiner.routing_peer_count().await.unwrap(), 0);
        assert!(matches!(
            joiner.bootstrap().await,
            Err(DiscoveryError::TableStopped)
        ));

        joiner.close().await.unwrap();
        anchor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_routing_entries_need_an_active_table() {
        let anchor = loopback_host().await;
        let joiner = loopback_host().await;

        joiner
            .connect(&descriptor_of(&anchor), Duration::from_secs(10))
            .await
            .unwrap();
        joiner
            .add_address(anchor.local_peer_id(), anchor.listen_addr().clone())
            .await
            .unwrap();
        assert_eq!(joiner.routing_peer_count().await.unwrap(), 0);

        joiner.close().await.unwrap();
        anchor.close().await.unwrap();
    }
}

//! Swarm Event Loop
//!
//! The swarm is owned by a single task. Every other component drives it
//! through `SwarmCommand`s sent over a channel, and learns about mDNS
//! discoveries through the sink installed by the Local Advertiser. Current
//! listen addresses are published on a watch channel.

use super::super::behaviour::{FogmeshBehaviour, FogmeshBehaviourEvent};
use super::super::PROTOCOL_VERSION;
use crate::error::{DiscoveryError, TransportError};
use crate::observability::metrics;
use futures::StreamExt;
use libp2p::core::transport::ListenerId;
use libp2p::swarm::dial_opts::{DialOpts, PeerCondition};
use libp2p::swarm::{ConnectionId, SwarmEvent};
use libp2p::{identify, kad, mdns, Multiaddr, PeerId, Swarm};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

/// A peer reported by LAN discovery, with every address it announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub peer_id: PeerId,
    pub addresses: Vec<Multiaddr>,
}

/// Commands accepted by the swarm task.
#[derive(Debug)]
pub enum SwarmCommand {
    /// Connect to a peer; replies once the connection is established or failed.
    Dial {
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Insert an address into the Kademlia routing table.
    AddAddress { peer_id: PeerId, address: Multiaddr },
    /// Start a Kademlia bootstrap query.
    Bootstrap {
        reply: oneshot::Sender<Result<(), DiscoveryError>>,
    },
    /// Enable or disable the routing table. Disabling evicts every entry.
    SetRouting { active: bool },
    /// Start mDNS and install the sink for its discoveries (`Some`), or stop
    /// mDNS and drop the sink (`None`).
    SetAdvertising {
        sink: Option<mpsc::UnboundedSender<DiscoveredPeer>>,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Number of peers currently in the routing table.
    RoutingPeers { reply: oneshot::Sender<usize> },
    /// Stop the event loop and drop the swarm, closing all connections.
    Close { reply: oneshot::Sender<()> },
}

pub(crate) struct EventLoop {
    swarm: Swarm<FogmeshBehaviour>,
    commands: mpsc::Receiver<SwarmCommand>,
    pending_dials: HashMap<ConnectionId, oneshot::Sender<Result<(), TransportError>>>,
    discovery_sink: Option<mpsc::UnboundedSender<DiscoveredPeer>>,
    routing_active: bool,
    listen_ready: Option<oneshot::Sender<Result<Multiaddr, TransportError>>>,
    listen_addrs: Vec<(ListenerId, Multiaddr)>,
    listen_watch: watch::Sender<Vec<Multiaddr>>,
}

/// Spawns the swarm event loop. `listen_ready` fires with the first address
/// the swarm reports listening on, or with the bind error; `listen_watch`
/// tracks every address it listens on afterwards.
pub fn spawn_event_loop(
    swarm: Swarm<FogmeshBehaviour>,
    commands: mpsc::Receiver<SwarmCommand>,
    listen_ready: oneshot::Sender<Result<Multiaddr, TransportError>>,
    listen_watch: watch::Sender<Vec<Multiaddr>>,
) -> tokio::task::JoinHandle<()> {
    let event_loop = EventLoop {
        swarm,
        commands,
        pending_dials: HashMap::new(),
        discovery_sink: None,
        routing_active: false,
        listen_ready: Some(listen_ready),
        listen_addrs: Vec::new(),
        listen_watch,
    };
    tokio::spawn(event_loop.run())
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }

                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All host handles dropped, stopping swarm");
                        break;
                    }
                },
            }
        }
    }

    /// Returns `false` once the loop should stop.
    fn handle_command(&mut self, command: SwarmCommand) -> bool {
        match command {
            SwarmCommand::Dial {
                peer_id,
                addresses,
                reply,
            } => self.dial(peer_id, addresses, reply),
            SwarmCommand::AddAddress { peer_id, address } => {
                if let Some(kademlia) = self.active_kademlia() {
                    kademlia.add_address(&peer_id, address);
                }
            }
            SwarmCommand::Bootstrap { reply } => {
                let _ = reply.send(self.bootstrap());
            }
            SwarmCommand::SetRouting { active } => self.set_routing(active),
            SwarmCommand::SetAdvertising { sink, reply } => {
                let _ = reply.send(self.set_advertising(sink));
            }
            SwarmCommand::RoutingPeers { reply } => {
                let _ = reply.send(self.routing_peers());
            }
            SwarmCommand::Close { reply } => {
                info!("Closing transport host");
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn dial(
        &mut self,
        peer_id: PeerId,
        addresses: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<(), TransportError>>,
    ) {
        if self.swarm.is_connected(&peer_id) {
            let _ = reply.send(Ok(()));
            return;
        }

        let opts = DialOpts::peer_id(peer_id)
            .condition(PeerCondition::Always)
            .addresses(addresses)
            .build();
        let connection_id = opts.connection_id();

        match self.swarm.dial(opts) {
            Ok(()) => {
                self.pending_dials.insert(connection_id, reply);
            }
            Err(e) => {
                let _ = reply.send(Err(TransportError::Dial(e.to_string())));
            }
        }
    }

    fn bootstrap(&mut self) -> Result<(), DiscoveryError> {
        let Some(kademlia) = self.active_kademlia() else {
            return Err(DiscoveryError::TableStopped);
        };

        match kademlia.bootstrap() {
            Ok(query_id) => {
                debug!(query_id = ?query_id, "Kademlia bootstrap started");
                Ok(())
            }
            Err(kad::NoKnownPeers()) => {
                // An anchor with nobody to converge with has nothing to do.
                debug!("Kademlia bootstrap skipped, routing table empty");
                Ok(())
            }
        }
    }

    fn set_routing(&mut self, active: bool) {
        self.routing_active = active;
        if active {
            return;
        }

        if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
            let known: Vec<PeerId> = kademlia
                .kbuckets()
                .flat_map(|bucket| {
                    bucket
                        .iter()
                        .map(|entry| *entry.node.key.preimage())
                        .collect::<Vec<_>>()
                })
                .collect();
            for peer_id in &known {
                kademlia.remove_peer(peer_id);
            }
            debug!(evicted = known.len(), "Routing table cleared");
        }
    }

    fn set_advertising(
        &mut self,
        sink: Option<mpsc::UnboundedSender<DiscoveredPeer>>,
    ) -> Result<(), TransportError> {
        match sink {
            Some(sink) => {
                let local_peer_id = *self.swarm.local_peer_id();
                self.swarm
                    .behaviour_mut()
                    .enable_mdns(local_peer_id, &self.listen_addrs)
                    .map_err(|e| TransportError::LocalDiscovery(e.to_string()))?;
                self.discovery_sink = Some(sink);
                debug!(addresses = self.listen_addrs.len(), "mDNS started");
            }
            None => {
                self.discovery_sink = None;
                if self.swarm.behaviour_mut().disable_mdns(&self.listen_addrs) {
                    debug!("mDNS stopped");
                }
            }
        }
        Ok(())
    }

    fn routing_peers(&mut self) -> usize {
        self.swarm
            .behaviour_mut()
            .kademlia
            .as_mut()
            .map(|kademlia| kademlia.kbuckets().map(|bucket| bucket.num_entries()).sum::<usize>())
            .unwrap_or(0)
    }

    fn publish_listen_addrs(&self) {
        let addrs = self.listen_addrs.iter().map(|(_, addr)| addr.clone()).collect();
        self.listen_watch.send_replace(addrs);
    }

    fn active_kademlia(&mut self) -> Option<&mut kad::Behaviour<kad::store::MemoryStore>> {
        if !self.routing_active {
            return None;
        }
        self.swarm.behaviour_mut().kademlia.as_mut()
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<FogmeshBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr {
                listener_id,
                address,
            } => {
                info!(address = %address, "P2P network listening");
                self.listen_addrs.push((listener_id, address.clone()));
                self.publish_listen_addrs();
                if let Some(ready) = self.listen_ready.take() {
                    let _ = ready.send(Ok(address));
                }
            }
            SwarmEvent::ExpiredListenAddr {
                listener_id,
                address,
            } => {
                debug!(address = %address, "Listen address expired");
                self.listen_addrs
                    .retain(|(id, addr)| *id != listener_id || *addr != address);
                self.publish_listen_addrs();
            }
            SwarmEvent::ListenerError { error, .. } => {
                warn!(error = %error, "Listener error");
                if let Some(ready) = self.listen_ready.take() {
                    let _ = ready.send(Err(TransportError::Listen {
                        address: "listener".to_string(),
                        reason: error.to_string(),
                    }));
                }
            }
            SwarmEvent::ListenerClosed {
                addresses, reason, ..
            } => {
                debug!(addresses = ?addresses, reason = ?reason, "Listener closed");
                if let Some(ready) = self.listen_ready.take() {
                    let reason = match reason {
                        Ok(()) => "closed before reporting an address".to_string(),
                        Err(e) => e.to_string(),
                    };
                    let _ = ready.send(Err(TransportError::Listen {
                        address: "listener".to_string(),
                        reason,
                    }));
                }
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                debug!(
                    peer_id_short = short_id(&peer_id),
                    remote_addr = %endpoint.get_remote_address(),
                    "Peer connected"
                );
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Ok(()));
                }
                if endpoint.is_dialer() {
                    let address = endpoint.get_remote_address().clone();
                    if let Some(kademlia) = self.active_kademlia() {
                        kademlia.add_address(&peer_id, address);
                    }
                }
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                trace!(
                    peer_id_short = short_id(&peer_id),
                    cause = ?cause,
                    "Peer disconnected"
                );
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                peer_id,
                error,
            } => {
                trace!(peer_id = ?peer_id, error = %error, "Outgoing connection failed");
                if let Some(reply) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Err(TransportError::Dial(error.to_string())));
                }
            }
            SwarmEvent::Behaviour(FogmeshBehaviourEvent::Mdns(event)) => {
                self.handle_mdns_event(event);
            }
            SwarmEvent::Behaviour(FogmeshBehaviourEvent::Identify(event)) => {
                self.handle_identify_event(event);
            }
            SwarmEvent::Behaviour(FogmeshBehaviourEvent::Kademlia(event)) => {
                handle_kademlia_event(event);
            }
            SwarmEvent::IncomingConnectionError { error, .. } => {
                trace!(error = %error, "Incoming connection failed");
            }
            _ => {}
        }
    }

    fn handle_mdns_event(&mut self, event: mdns::Event) {
        match event {
            mdns::Event::Discovered(list) => {
                let mut by_peer: BTreeMap<PeerId, Vec<Multiaddr>> = BTreeMap::new();
                for (peer_id, address) in list {
                    by_peer.entry(peer_id).or_default().push(address);
                }

                let Some(sink) = self.discovery_sink.as_ref() else {
                    trace!(count = by_peer.len(), "mDNS discoveries ignored, advertiser stopped");
                    return;
                };

                let mut sink_closed = false;
                for (peer_id, addresses) in by_peer {
                    metrics::record_mdns_discovery();
                    if sink.send(DiscoveredPeer { peer_id, addresses }).is_err() {
                        sink_closed = true;
                        break;
                    }
                }
                if sink_closed {
                    debug!("Local advertiser went away, dropping discovery sink");
                    self.discovery_sink = None;
                }
            }
            mdns::Event::Expired(list) => {
                for (peer_id, address) in list {
                    trace!(
                        peer_id_short = short_id(&peer_id),
                        addr = %address,
                        "mDNS: peer expired"
                    );
                    if let Some(kademlia) = self.active_kademlia() {
                        kademlia.remove_address(&peer_id, &address);
                    }
                }
            }
        }
    }

    fn handle_identify_event(&mut self, event: identify::Event) {
        match event {
            identify::Event::Received { peer_id, info, .. } => {
                if !same_service(&info.protocol_version) {
                    warn!(
                        peer_id_short = short_id(&peer_id),
                        protocol_version = %info.protocol_version,
                        "Peer belongs to a different service, disconnecting"
                    );
                    let _ = self.swarm.disconnect_peer_id(peer_id);
                    if let Some(kademlia) = self.swarm.behaviour_mut().kademlia.as_mut() {
                        kademlia.remove_peer(&peer_id);
                    }
                    return;
                }

                trace!(
                    peer_id_short = short_id(&peer_id),
                    agent_version = %info.agent_version,
                    listen_addrs = info.listen_addrs.len(),
                    "Identify: received peer info"
                );
                if let Some(kademlia) = self.active_kademlia() {
                    for address in info.listen_addrs {
                        kademlia.add_address(&peer_id, address);
                    }
                }
            }
            identify::Event::Error { peer_id, error, .. } => {
                trace!(
                    peer_id_short = short_id(&peer_id),
                    error = %error,
                    "Identify: protocol error"
                );
            }
            _ => {}
        }
    }
}

/// Whether a peer's identify protocol version belongs to this deployment.
fn same_service(protocol_version: &str) -> bool {
    protocol_version == PROTOCOL_VERSION
}

fn handle_kademlia_event(event: kad::Event) {
    match event {
        kad::Event::OutboundQueryProgressed {
            result: kad::QueryResult::Bootstrap(result),
            ..
        } => match result {
            Ok(ok) => trace!(
                peer = %ok.peer,
                remaining = ok.num_remaining,
                "Kademlia: bootstrap progressed"
            ),
            Err(e) => debug!(error = ?e, "Kademlia: bootstrap query failed"),
        },
        kad::Event::RoutingUpdated { peer, is_new_peer, .. } => {
            if is_new_peer {
                debug!(peer_id_short = short_id(&peer), "Kademlia: routing table gained peer");
            }
        }
        other => trace!(event = ?other, "Kademlia: DHT event"),
    }
}

/// Last characters of a base58 peer ID, for compact log fields.
pub(crate) fn short_id(peer_id: &PeerId) -> String {
    let full = peer_id.to_base58();
    let start = full.len().saturating_sub(6);
    full[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::identity::Keypair;

    #[test]
    fn test_same_service() {
        assert!(same_service("/fog-computing/1.0.0"));
        assert!(!same_service("/fog-computing/2.0.0"));
        assert!(!same_service("/ipfs/0.1.0"));
        assert!(!same_service(""));
    }

    #[test]
    fn test_short_id_is_suffix() {
        let peer_id = PeerId::from(Keypair::generate_ed25519().public());
        let short = short_id(&peer_id);
        assert_eq!(short.len(), 6);
        assert!(peer_id.to_base58().ends_with(&short));
    }
}

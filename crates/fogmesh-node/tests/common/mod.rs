//! Shared test doubles: a scripted swarm behind a real `HostHandle` and a
//! registry that records every call.

#![allow(dead_code)]

use async_trait::async_trait;
use fogmesh_core::{ApplicationRecord, NodeRecord};
use fogmesh_node::error::{DiscoveryError, RegistryError, TransportError};
use fogmesh_node::network::{HostHandle, PeerDescriptor, RoutingTable, SwarmCommand};
use fogmesh_node::registry::{MemoryRegistry, Registry};
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn random_peer() -> PeerId {
    PeerId::from(Keypair::generate_ed25519().public())
}

pub fn peer_address(host: u8, peer: &PeerId) -> String {
    format!("/ip4/10.0.0.{host}/tcp/4001/p2p/{peer}")
}

/// What the fake swarm observed.
#[derive(Debug, Default)]
pub struct SwarmLog {
    pub reachable: HashSet<PeerId>,
    pub dials: Vec<PeerId>,
    pub added: Vec<(PeerId, Multiaddr)>,
    pub bootstraps: usize,
    pub routing_active: bool,
    pub routing_toggles: usize,
    pub advertising: bool,
    pub closed: bool,
}

/// Spawns a task answering swarm commands the way the real event loop would,
/// with dial outcomes taken from `SwarmLog::reachable`.
pub fn spawn_fake_host(listen: &str) -> (HostHandle, Arc<Mutex<SwarmLog>>) {
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let log = Arc::new(Mutex::new(SwarmLog::default()));
    let task_log = log.clone();

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let mut log = task_log.lock().unwrap();
            match command {
                SwarmCommand::Dial { peer_id, reply, .. } => {
                    log.dials.push(peer_id);
                    let result = if log.reachable.contains(&peer_id) {
                        Ok(())
                    } else {
                        Err(TransportError::Dial("connection refused".into()))
                    };
                    let _ = reply.send(result);
                }
                SwarmCommand::AddAddress { peer_id, address } => {
                    log.added.push((peer_id, address));
                }
                SwarmCommand::Bootstrap { reply } => {
                    let result = if log.routing_active {
                        log.bootstraps += 1;
                        Ok(())
                    } else {
                        Err(DiscoveryError::TableStopped)
                    };
                    let _ = reply.send(result);
                }
                SwarmCommand::SetRouting { active } => {
                    log.routing_active = active;
                    log.routing_toggles += 1;
                }
                SwarmCommand::SetAdvertising { sink, reply } => {
                    log.advertising = sink.is_some();
                    let _ = reply.send(Ok(()));
                }
                SwarmCommand::RoutingPeers { reply } => {
                    let _ = reply.send(log.added.len());
                }
                SwarmCommand::Close { reply } => {
                    log.closed = true;
                    let _ = reply.send(());
                    break;
                }
            }
        }
    });

    let listen: Multiaddr = listen.parse().expect("valid test listen address");
    (HostHandle::new(random_peer(), listen, tx), log)
}

/// Memory ledger that counts calls and can refuse registration.
#[derive(Default)]
pub struct RecordingRegistry {
    pub inner: MemoryRegistry,
    pub fail_register: bool,
    pub fail_list: bool,
    pub register_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub removals: Mutex<Vec<String>>,
}

impl RecordingRegistry {
    pub fn with_bootstrap_peers(peers: Vec<String>) -> Self {
        Self {
            inner: MemoryRegistry::with_bootstrap_peers(peers),
            ..Self::default()
        }
    }

    pub fn removals(&self) -> Vec<String> {
        self.removals.lock().unwrap().clone()
    }
}

#[async_trait]
impl Registry for RecordingRegistry {
    async fn register_node(&self, record: &NodeRecord) -> Result<(), RegistryError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_register {
            return Err(RegistryError::Unavailable("ledger rejected write".into()));
        }
        self.inner.register_node(record).await
    }

    async fn list_bootstrap_peers(&self) -> Result<Vec<String>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(RegistryError::Unavailable("ledger offline".into()));
        }
        self.inner.list_bootstrap_peers().await
    }

    async fn remove_bootstrap_peer(&self, address: &str) -> Result<(), RegistryError> {
        self.removals.lock().unwrap().push(address.to_string());
        self.inner.remove_bootstrap_peer(address).await
    }

    async fn deploy_application(&self, record: &ApplicationRecord) -> Result<(), RegistryError> {
        self.inner.deploy_application(record).await
    }
}

/// Routing table whose connects take a fixed time and then succeed or fail.
pub struct DelayedTable {
    pub delay: Duration,
    pub reachable: bool,
    pub bootstraps: AtomicUsize,
}

impl DelayedTable {
    pub fn new(delay: Duration, reachable: bool) -> Self {
        Self {
            delay,
            reachable,
            bootstraps: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RoutingTable for DelayedTable {
    async fn bootstrap(&self) -> Result<(), DiscoveryError> {
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(
        &self,
        _peer: &PeerDescriptor,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        tokio::time::sleep(self.delay).await;
        if self.reachable {
            Ok(())
        } else {
            Err(TransportError::Dial("unreachable".into()))
        }
    }
}

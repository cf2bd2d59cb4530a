//! Local Advertiser
//!
//! LAN-scoped discovery. While the advertiser runs, the swarm's mDNS behaviour
//! announces this node and reports peers, and each report is turned into a
//! bounded connection attempt. Attempts are never retried here, the next mDNS
//! announcement of the same peer is the retry. Stopping tears mDNS down.

use super::host::HostHandle;
use super::swarm::{short_id, DiscoveredPeer};
use crate::error::TransportError;
use crate::observability::events;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

pub struct LocalAdvertiser {
    host: HostHandle,
    connect_timeout: Duration,
    task: Option<JoinHandle<()>>,
}

impl LocalAdvertiser {
    pub fn new(host: HostHandle, connect_timeout: Duration) -> Self {
        Self {
            host,
            connect_timeout,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Starts handling discoveries. Starting a running advertiser is a no-op.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        if self.task.is_some() {
            return Ok(());
        }

        let (sink, discoveries) = mpsc::unbounded_channel();
        self.host.set_advertising(Some(sink)).await?;
        self.task = Some(tokio::spawn(run_discovery_loop(
            self.host.clone(),
            discoveries,
            self.connect_timeout,
        )));

        debug!("Local advertiser started");
        Ok(())
    }

    /// Stops mDNS and aborts in-flight connection attempts.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        if let Err(e) = self.host.set_advertising(None).await {
            debug!(error = %e, "Host already closed while stopping advertiser");
        }
        task.abort();
        let _ = task.await;
        debug!("Local advertiser stopped");
    }
}

impl Drop for LocalAdvertiser {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_discovery_loop(
    host: HostHandle,
    mut discoveries: mpsc::UnboundedReceiver<DiscoveredPeer>,
    connect_timeout: Duration,
) {
    // Dropping the set on exit aborts whatever is still connecting.
    let mut attempts = JoinSet::new();

    loop {
        tokio::select! {
            discovered = discoveries.recv() => {
                let Some(peer) = discovered else { break };
                if peer.peer_id == host.local_peer_id() {
                    continue;
                }
                events::peer_discovered(&peer.peer_id, peer.addresses.len());
                attempts.spawn(connect_discovered(host.clone(), peer, connect_timeout));
            }
            Some(_) = attempts.join_next(), if !attempts.is_empty() => {}
        }
    }
}

async fn connect_discovered(host: HostHandle, peer: DiscoveredPeer, timeout: Duration) {
    let peer_id = peer.peer_id;
    match host.connect_peer(peer_id, peer.addresses, timeout).await {
        Ok(()) => debug!(
            peer_id_short = short_id(&peer_id),
            "Connected to locally discovered peer"
        ),
        Err(e) => warn!(
            peer_id_short = short_id(&peer_id),
            error = %e,
            "Failed to connect to locally discovered peer"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::swarm::SwarmCommand;
    use libp2p::identity::Keypair;
    use libp2p::{Multiaddr, PeerId};
    use tokio::sync::oneshot;

    fn random_peer() -> PeerId {
        PeerId::from(Keypair::generate_ed25519().public())
    }

    fn advertiser(timeout: Duration) -> (LocalAdvertiser, mpsc::Receiver<SwarmCommand>) {
        let (tx, rx) = mpsc::channel(16);
        let listen: Multiaddr = "/ip4/127.0.0.1/tcp/4001".parse().unwrap();
        let host = HostHandle::new(random_peer(), listen, tx);
        (LocalAdvertiser::new(host, timeout), rx)
    }

    /// Starts the advertiser, acknowledging the mDNS start like the swarm does.
    async fn start(
        advertiser: &mut LocalAdvertiser,
        rx: &mut mpsc::Receiver<SwarmCommand>,
    ) -> mpsc::UnboundedSender<DiscoveredPeer> {
        let swarm = async {
            match rx.recv().await {
                Some(SwarmCommand::SetAdvertising {
                    sink: Some(sink),
                    reply,
                }) => {
                    reply.send(Ok(())).unwrap();
                    sink
                }
                other => panic!("unexpected command: {other:?}"),
            }
        };
        let (started, sink) = tokio::join!(advertiser.start(), swarm);
        started.unwrap();
        sink
    }

    async fn stop(advertiser: &mut LocalAdvertiser, rx: &mut mpsc::Receiver<SwarmCommand>) {
        let swarm = async {
            match rx.recv().await {
                Some(SwarmCommand::SetAdvertising { sink: None, reply }) => {
                    reply.send(Ok(())).unwrap();
                }
                other => panic!("unexpected command: {other:?}"),
            }
        };
        tokio::join!(advertiser.stop(), swarm);
    }

    fn announce(sink: &mpsc::UnboundedSender<DiscoveredPeer>, peer_id: PeerId) {
        sink.send(DiscoveredPeer {
            peer_id,
            addresses: vec!["/ip4/192.168.1.20/tcp/4001".parse().unwrap()],
        })
        .unwrap();
    }

    async fn expect_dial(
        rx: &mut mpsc::Receiver<SwarmCommand>,
    ) -> (PeerId, oneshot::Sender<Result<(), TransportError>>) {
        match rx.recv().await {
            Some(SwarmCommand::Dial { peer_id, reply, .. }) => (peer_id, reply),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refused_discovery_is_not_retried() {
        let (mut advertiser, mut rx) = advertiser(Duration::from_secs(10));
        let sink = start(&mut advertiser, &mut rx).await;
        assert!(advertiser.is_running());

        let discovered = random_peer();
        announce(&sink, discovered);
        let (peer_id, reply) = expect_dial(&mut rx).await;
        assert_eq!(peer_id, discovered);
        reply
            .send(Err(TransportError::Dial("refused".into())))
            .unwrap();

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(rx.try_recv().is_err());

        stop(&mut advertiser, &mut rx).await;
        assert!(!advertiser.is_running());
    }

    #[tokio::test]
    async fn test_own_announcement_is_ignored() {
        let (mut advertiser, mut rx) = advertiser(Duration::from_secs(10));
        let sink = start(&mut advertiser, &mut rx).await;

        announce(&sink, advertiser.host.local_peer_id());
        let other = random_peer();
        announce(&sink, other);
        let (peer_id, _reply) = expect_dial(&mut rx).await;
        assert_eq!(peer_id, other);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_attempt_is_bounded() {
        let (mut advertiser, mut rx) = advertiser(Duration::from_secs(10));
        let sink = start(&mut advertiser, &mut rx).await;

        announce(&sink, random_peer());
        // The swarm never answers this dial.
        let (_, reply) = expect_dial(&mut rx).await;

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!reply.is_closed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(reply.is_closed());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_fails_when_mdns_cannot_start() {
        let (mut advertiser, mut rx) = advertiser(Duration::from_secs(10));
        let swarm = async {
            if let Some(SwarmCommand::SetAdvertising { reply, .. }) = rx.recv().await {
                reply
                    .send(Err(TransportError::LocalDiscovery("no multicast".into())))
                    .unwrap();
            }
        };
        let (started, ()) = tokio::join!(advertiser.start(), swarm);
        assert!(matches!(started, Err(TransportError::LocalDiscovery(_))));
        assert!(!advertiser.is_running());
    }
}

//! Peer Descriptors
//!
//! A bootstrap entry is only connectable if it names both a transport address
//! and the peer expected at that address, i.e. a multiaddr ending in
//! `/p2p/<peer-id>`.

use libp2p::multiaddr::Protocol;
use libp2p::{Multiaddr, PeerId};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("not a multiaddr: {0}")]
    Multiaddr(#[from] libp2p::multiaddr::Error),

    #[error("missing trailing /p2p/<peer-id> component")]
    MissingPeerId,

    #[error("no transport address before /p2p component")]
    MissingAddress,
}

/// A dialable peer: identity plus transport address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerDescriptor {
    pub peer_id: PeerId,
    /// Transport address without the `/p2p` suffix.
    pub address: Multiaddr,
}

impl PeerDescriptor {
    pub fn new(peer_id: PeerId, address: Multiaddr) -> Self {
        let address = strip_peer_id(address);
        Self { peer_id, address }
    }

    pub fn parse(s: &str) -> Result<Self, DescriptorError> {
        let mut address: Multiaddr = s.trim().parse()?;
        let peer_id = match address.pop() {
            Some(Protocol::P2p(peer_id)) => peer_id,
            _ => return Err(DescriptorError::MissingPeerId),
        };
        if address.is_empty() {
            return Err(DescriptorError::MissingAddress);
        }
        Ok(Self { peer_id, address })
    }

    /// Full multiaddr including the `/p2p/<peer-id>` suffix.
    pub fn to_multiaddr(&self) -> Multiaddr {
        self.address.clone().with(Protocol::P2p(self.peer_id))
    }
}

impl FromStr for PeerDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_multiaddr())
    }
}

fn strip_peer_id(mut address: Multiaddr) -> Multiaddr {
    if matches!(address.iter().last(), Some(Protocol::P2p(_))) {
        address.pop();
    }
    address
}

#[cfg(test)]
mod tests {
    use super::*;
    use libp2p::identity::Keypair;

    fn random_peer() -> PeerId {
        PeerId::from(Keypair::generate_ed25519().public())
    }

    #[test]
    fn test_parse_full_descriptor() {
        let peer_id = random_peer();
        let raw = format!("/ip4/10.1.2.3/tcp/4001/p2p/{peer_id}");
        let descriptor = PeerDescriptor::parse(&raw).unwrap();
        assert_eq!(descriptor.peer_id, peer_id);
        assert_eq!(descriptor.address.to_string(), "/ip4/10.1.2.3/tcp/4001");
        assert_eq!(descriptor.to_string(), raw);
    }

    #[test]
    fn test_missing_peer_id_is_rejected() {
        assert!(matches!(
            PeerDescriptor::parse("/ip4/10.1.2.3/tcp/4001"),
            Err(DescriptorError::MissingPeerId)
        ));
    }

    #[test]
    fn test_bare_peer_id_is_rejected() {
        let raw = format!("/p2p/{}", random_peer());
        assert!(matches!(
            PeerDescriptor::parse(&raw),
            Err(DescriptorError::MissingAddress)
        ));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            PeerDescriptor::parse("not-an-address"),
            Err(DescriptorError::Multiaddr(_))
        ));
        assert!(PeerDescriptor::parse("").is_err());
    }

    #[test]
    fn test_new_strips_existing_suffix() {
        let peer_id = random_peer();
        let with_suffix: Multiaddr = format!("/ip4/127.0.0.1/tcp/9000/p2p/{peer_id}")
            .parse()
            .unwrap();
        let descriptor = PeerDescriptor::new(peer_id, with_suffix);
        assert_eq!(descriptor.address.to_string(), "/ip4/127.0.0.1/tcp/9000");
    }
}

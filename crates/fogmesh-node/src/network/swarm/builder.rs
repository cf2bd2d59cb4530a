//! Swarm Builder
//!
//! Handles libp2p swarm creation with TCP/QUIC transports, noise encryption,
//! and yamux multiplexing.

use super::super::behaviour::{FogmeshBehaviour, TableMode};
use super::super::config::NetworkConfig;
use crate::error::TransportError;
use fogmesh_core::Capabilities;
use libp2p::{noise, swarm::Swarm, tcp, yamux, Multiaddr};
use tracing::debug;

/// Creates a swarm with a fresh ed25519 identity and binds it to `listen`.
pub fn build_swarm(
    listen: &Multiaddr,
    capabilities: Capabilities,
    table_mode: TableMode,
    config: &NetworkConfig,
) -> Result<Swarm<FogmeshBehaviour>, TransportError> {
    let config_for_behaviour = config.clone();
    let idle_timeout = config.connection_idle_timeout;

    let mut swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| TransportError::Build(e.to_string()))?
        .with_quic()
        .with_behaviour(move |key| -> Result<_, Box<dyn std::error::Error + Send + Sync>> {
            debug!(
                peer_id = %key.public().to_peer_id(),
                "Created swarm identity"
            );

            Ok(FogmeshBehaviour::new(
                key.public(),
                capabilities,
                table_mode,
                &config_for_behaviour,
            ))
        })
        .map_err(|e| TransportError::Build(e.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(idle_timeout))
        .build();

    swarm
        .listen_on(listen.clone())
        .map_err(|e| TransportError::Listen {
            address: listen.to_string(),
            reason: e.to_string(),
        })?;
    debug!(address = %listen, "Configured P2P listen address");

    Ok(swarm)
}

//! Structured Events
//!
//! Membership events logged with an `event_type` field so they can be
//! filtered out of the regular log stream.
//!
//! Event types:
//! - `node_registered` - This node's record was written to the registry
//! - `peer_discovered` - A LAN peer was reported by mDNS
//! - `bootstrap_peer_pruned` - An unreachable address left the bootstrap set
//! - `reconciliation_completed` - A reconciliation tick ran to the end
//! - `reconciliation_abandoned` - A tick gave up before probing
//! - `node_deregistered` - Shutdown removed this node from the bootstrap set

use libp2p::PeerId;
use std::time::Duration;
use tracing::{info, warn};

pub fn node_registered(node_id: &str, tier: &str, address: &str, bootstrap_eligible: bool) {
    info!(
        event_type = "node_registered",
        node_id = %node_id,
        tier = %tier,
        address = %address,
        bootstrap_eligible,
        "Node registered"
    );
}

pub fn peer_discovered(peer_id: &PeerId, address_count: usize) {
    info!(
        event_type = "peer_discovered",
        peer_id = %peer_id,
        address_count,
        "Local peer discovered"
    );
}

pub fn bootstrap_peer_pruned(address: &str, consecutive_failures: u32) {
    info!(
        event_type = "bootstrap_peer_pruned",
        address = %address,
        consecutive_failures,
        "Pruned unreachable bootstrap peer"
    );
}

pub fn reconciliation_completed(
    examined: usize,
    reachable: usize,
    pruned: usize,
    removal_failures: usize,
    duration: Duration,
) {
    info!(
        event_type = "reconciliation_completed",
        examined,
        reachable,
        pruned,
        removal_failures,
        duration_ms = duration.as_millis() as u64,
        "Reconciliation tick completed"
    );
}

pub fn reconciliation_abandoned(reason: &str) {
    warn!(
        event_type = "reconciliation_abandoned",
        reason = %reason,
        "Reconciliation tick abandoned"
    );
}

/// `removed` is false when the removal failed and the entry is left for
/// other nodes to prune.
pub fn node_deregistered(node_id: &str, address: &str, removed: bool) {
    info!(
        event_type = "node_deregistered",
        node_id = %node_id,
        address = %address,
        removed,
        "Node left bootstrap set"
    );
}

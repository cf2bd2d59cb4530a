//! Registry Data Model
//!
//! Node tiers, per-tier capabilities, and the records stored in the registry.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Capability class of a node in the mesh.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Tier {
    /// Constrained edge device, LAN discovery only.
    #[serde(rename = "iot")]
    #[strum(serialize = "iot")]
    IoT,
    /// Intermediate node, participates in both LAN and global discovery.
    #[default]
    Fog,
    /// Datacenter node, global discovery only.
    Cloud,
}

impl Tier {
    /// Resolve the fixed capability set for this tier.
    pub fn capabilities(self) -> Capabilities {
        match self {
            Tier::IoT => Capabilities {
                local_advertiser: true,
                distributed_table: false,
                bootstrap_eligible: false,
            },
            Tier::Fog => Capabilities {
                local_advertiser: true,
                distributed_table: true,
                bootstrap_eligible: true,
            },
            Tier::Cloud => Capabilities {
                local_advertiser: false,
                distributed_table: true,
                bootstrap_eligible: true,
            },
        }
    }

    /// Whether nodes of this tier publish their address into the bootstrap set.
    pub fn contributes_to_bootstrap(self) -> bool {
        self.capabilities().bootstrap_eligible
    }
}

/// Discovery mechanisms and registry duties of a node, derived once from its tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Runs LAN-scoped discovery (mDNS).
    pub local_advertiser: bool,
    /// Participates in the Kademlia routing table.
    pub distributed_table: bool,
    /// Address belongs in the shared bootstrap set.
    pub bootstrap_eligible: bool,
}

/// A node's registration entry, upserted into the registry keyed by `id`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeRecord {
    /// Base58 peer ID derived from the node's keypair.
    pub id: String,
    #[serde(rename = "type")]
    pub tier: Tier,
    /// Externally reachable multiaddress, including the `/p2p/<peer-id>` suffix.
    pub address: String,
}

/// Application deployment entry. Stored by the registry, never read by membership logic.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApplicationRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_capability_matrix() {
        let iot = Tier::IoT.capabilities();
        assert!(iot.local_advertiser);
        assert!(!iot.distributed_table);
        assert!(!iot.bootstrap_eligible);

        let fog = Tier::Fog.capabilities();
        assert!(fog.local_advertiser);
        assert!(fog.distributed_table);
        assert!(fog.bootstrap_eligible);

        let cloud = Tier::Cloud.capabilities();
        assert!(!cloud.local_advertiser);
        assert!(cloud.distributed_table);
        assert!(cloud.bootstrap_eligible);
    }

    #[test]
    fn test_capabilities_are_deterministic() {
        for tier in [Tier::IoT, Tier::Fog, Tier::Cloud] {
            assert_eq!(tier.capabilities(), tier.capabilities());
        }
    }

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!(Tier::from_str("iot").unwrap(), Tier::IoT);
        assert_eq!(Tier::from_str("FOG").unwrap(), Tier::Fog);
        assert_eq!(Tier::from_str("cloud").unwrap(), Tier::Cloud);
        assert!(Tier::from_str("edge").is_err());
        assert_eq!(Tier::IoT.to_string(), "iot");
        assert_eq!(Tier::default(), Tier::Fog);
    }

    #[test]
    fn test_node_record_json_uses_type_field() {
        let record = NodeRecord {
            id: "12D3KooWTest".to_string(),
            tier: Tier::IoT,
            address: "/ip4/10.0.0.1/tcp/4001/p2p/12D3KooWTest".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "iot");
        assert_eq!(json["id"], "12D3KooWTest");

        let parsed: NodeRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_application_record_defaults() {
        let app: ApplicationRecord =
            serde_json::from_str(r#"{"id": "app-1", "name": "sensor-fusion"}"#).unwrap();
        assert_eq!(app.name, "sensor-fusion");
        assert!(app.description.is_empty());
        assert!(app.status.is_empty());
    }
}

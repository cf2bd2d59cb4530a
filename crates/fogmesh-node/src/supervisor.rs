//! Node Supervisor
//!
//! Composes the tier's discovery adapters over one transport host, joins the
//! registry and owns the reconciliation task.
//!
//! Start order: table, table bootstrap, advertiser, registration, reconciler.
//! Only a failed registration, an mDNS start failure or a dead host abort
//! startup. Stop is
//! best-effort and never fails: reconciler, advertiser, table, bootstrap-set
//! self-removal, host.

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::network::{
    spawn_host, DistributedTable, HostHandle, LocalAdvertiser, RoutingTable, TableMode,
};
use crate::observability::{events, metrics};
use crate::reconcile::{spawn_reconciler, ReconcileSettings, ReconcileTask, Reconciler, TickStats};
use crate::registry::Registry;
use fogmesh_core::{Capabilities, NodeRecord, Tier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Discovery adapters present on a node, one variant per tier. Matches the
/// `local_advertiser` and `distributed_table` flags of `Tier::capabilities`.
enum DiscoveryStack {
    /// IoT: LAN discovery only.
    LocalOnly(LocalAdvertiser),
    /// Fog: LAN discovery plus the routing table.
    Hybrid {
        advertiser: LocalAdvertiser,
        table: Arc<DistributedTable>,
    },
    /// Cloud: routing table only.
    GlobalOnly(Arc<DistributedTable>),
}

impl DiscoveryStack {
    fn build(tier: Tier, host: &HostHandle, config: &NodeConfig) -> Self {
        let advertiser = || LocalAdvertiser::new(host.clone(), config.network.mdns_connect_timeout);
        let table = || Arc::new(DistributedTable::new(host.clone(), config.seeds.clone()));

        match tier {
            Tier::IoT => DiscoveryStack::LocalOnly(advertiser()),
            Tier::Fog => DiscoveryStack::Hybrid {
                advertiser: advertiser(),
                table: table(),
            },
            Tier::Cloud => DiscoveryStack::GlobalOnly(table()),
        }
    }

    fn table(&self) -> Option<&Arc<DistributedTable>> {
        match self {
            DiscoveryStack::Hybrid { table, .. } | DiscoveryStack::GlobalOnly(table) => Some(table),
            DiscoveryStack::LocalOnly(_) => None,
        }
    }

    fn advertiser_mut(&mut self) -> Option<&mut LocalAdvertiser> {
        match self {
            DiscoveryStack::LocalOnly(advertiser) | DiscoveryStack::Hybrid { advertiser, .. } => {
                Some(advertiser)
            }
            DiscoveryStack::GlobalOnly(_) => None,
        }
    }
}

/// Liveness and readiness flags shared with the HTTP API.
#[derive(Debug, Default)]
pub struct NodeStatus {
    registered: AtomicBool,
    stopping: AtomicBool,
}

impl NodeStatus {
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Ready to serve: registered and not shutting down.
    pub fn is_ready(&self) -> bool {
        self.is_registered() && !self.is_stopping()
    }
}

pub struct Node {
    capabilities: Capabilities,
    record: NodeRecord,
    host: HostHandle,
    registry: Arc<dyn Registry>,
    discovery: DiscoveryStack,
    reconcile_settings: ReconcileSettings,
    reconciler: Option<ReconcileTask>,
    status: Arc<NodeStatus>,
    stopped: bool,
}

impl Node {
    /// Binds the transport host and prepares the tier's adapters. Nothing is
    /// announced until `start`.
    pub async fn new(config: NodeConfig, registry: Arc<dyn Registry>) -> Result<Self, NodeError> {
        let capabilities = config.tier.capabilities();
        let host = spawn_host(
            &config.listen,
            capabilities,
            TableMode::for_seed_count(config.seeds.len()),
            &config.network,
        )
        .await?;
        Ok(Self::with_host(config, registry, host))
    }

    /// Builds a node over an already running host.
    pub fn with_host(config: NodeConfig, registry: Arc<dyn Registry>, host: HostHandle) -> Self {
        let capabilities = config.tier.capabilities();
        let discovery = DiscoveryStack::build(config.tier, &host, &config);
        let record = NodeRecord {
            id: host.local_peer_id().to_base58(),
            tier: config.tier,
            address: host.advertised_address(config.external_address.as_ref()),
        };

        info!(
            node_id = %record.id,
            tier = %config.tier,
            address = %record.address,
            local_advertiser = capabilities.local_advertiser,
            distributed_table = capabilities.distributed_table,
            "Node constructed"
        );

        Self {
            capabilities,
            record,
            host,
            registry,
            discovery,
            reconcile_settings: ReconcileSettings::from_network(&config.network),
            reconciler: None,
            status: Arc::new(NodeStatus::default()),
            stopped: false,
        }
    }

    pub fn tier(&self) -> Tier {
        self.record.tier
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn record(&self) -> &NodeRecord {
        &self.record
    }

    pub fn registry(&self) -> Arc<dyn Registry> {
        self.registry.clone()
    }

    pub fn status(&self) -> Arc<NodeStatus> {
        self.status.clone()
    }

    pub fn has_distributed_table(&self) -> bool {
        self.discovery.table().is_some()
    }

    pub fn has_local_advertiser(&self) -> bool {
        match self.discovery {
            DiscoveryStack::LocalOnly(_) | DiscoveryStack::Hybrid { .. } => true,
            DiscoveryStack::GlobalOnly(_) => false,
        }
    }

    /// Tick counters of the running reconciler, if any.
    pub fn reconcile_stats(&self) -> Option<TickStats> {
        self.reconciler.as_ref().map(ReconcileTask::stats)
    }

    pub async fn start(&mut self) -> Result<(), NodeError> {
        if let Some(table) = self.discovery.table() {
            table.start().await?;
            if let Err(e) = table.bootstrap().await {
                warn!(error = %e, "Initial routing table bootstrap failed");
            }
        }

        if let Some(advertiser) = self.discovery.advertiser_mut() {
            advertiser.start().await?;
        }

        if let Err(e) = self.registry.register_node(&self.record).await {
            metrics::record_registry_error("register_node");
            return Err(e.into());
        }
        self.status.registered.store(true, Ordering::SeqCst);
        events::node_registered(
            &self.record.id,
            &self.record.tier.to_string(),
            &self.record.address,
            self.capabilities.bootstrap_eligible,
        );

        if let Some(table) = self.discovery.table() {
            let table: Arc<dyn RoutingTable> = table.clone();
            let reconciler = Reconciler::new(
                self.registry.clone(),
                table,
                self.reconcile_settings.clone(),
                self.record.address.clone(),
                self.host.local_peer_id(),
            );
            self.reconciler = Some(spawn_reconciler(reconciler));
        }

        info!(node_id = %self.record.id, "Node started");
        Ok(())
    }

    /// Tears the node down. Every step is attempted even if an earlier one
    /// failed; calling `stop` twice is a no-op.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.status.stopping.store(true, Ordering::SeqCst);

        if let Some(reconciler) = self.reconciler.take() {
            reconciler.shutdown().await;
        }

        if let Some(advertiser) = self.discovery.advertiser_mut() {
            advertiser.stop().await;
        }

        if let Some(table) = self.discovery.table() {
            table.stop().await;
        }

        if self.capabilities.bootstrap_eligible {
            let removed = match self.registry.remove_bootstrap_peer(&self.record.address).await {
                Ok(()) => true,
                Err(e) => {
                    metrics::record_registry_error("remove_bootstrap_peer");
                    warn!(
                        error = %e,
                        address = %self.record.address,
                        "Failed to leave bootstrap set, other nodes will prune it"
                    );
                    false
                }
            };
            events::node_deregistered(&self.record.id, &self.record.address, removed);
        }

        if let Err(e) = self.host.close().await {
            warn!(error = %e, "Failed to close transport host");
        }
        self.status.registered.store(false, Ordering::SeqCst);
        info!(node_id = %self.record.id, "Node stopped");
    }
}

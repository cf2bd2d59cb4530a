//! Bootstrap Reconciliation
//!
//! Periodically compares the shared bootstrap set against what this node can
//! actually reach, prunes dead entries and re-triggers routing convergence.
//!
//! One tick:
//! 1. Fetch the bootstrap set. A failed fetch abandons the tick with no
//!    further registry calls and no bootstrap.
//! 2. Probe every address except our own, concurrently with a bound and a
//!    per-peer timeout. Unparseable addresses count as unreachable.
//! 3. Bootstrap the routing table, whatever the probes found.
//! 4. Remove every address whose consecutive failures reached the threshold.
//!    Removals are independent; one failing does not stop the others.
//!
//! Ticks run on a single task, so tick n+1 never starts before tick n ends.

use crate::error::RegistryError;
use crate::network::{NetworkConfig, PeerDescriptor, RoutingTable};
use crate::observability::{events, metrics};
use crate::registry::Registry;
use futures::stream::{self, StreamExt};
use libp2p::PeerId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub probe_concurrency: usize,
    /// Consecutive failed probes before an address is removed.
    pub prune_after_failures: u32,
}

impl ReconcileSettings {
    pub fn from_network(config: &NetworkConfig) -> Self {
        Self {
            interval: config.reconcile_interval,
            probe_timeout: config.probe_timeout,
            probe_concurrency: config.probe_concurrency,
            prune_after_failures: config.prune_after_failures,
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self::from_network(&NetworkConfig::default())
    }
}

/// Result of one completed tick. Addresses keep registry order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub reachable: Vec<String>,
    pub unreachable: Vec<String>,
    pub pruned: Vec<String>,
    pub removal_failures: Vec<String>,
}

/// Counts ticks in flight. Shared with tests to prove ticks never overlap.
#[derive(Debug, Clone, Default)]
pub struct TickStats {
    inner: Arc<TickCounters>,
}

#[derive(Debug, Default)]
struct TickCounters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: AtomicUsize,
}

impl TickStats {
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    fn enter(&self) -> TickGuard {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.inner.started.fetch_add(1, Ordering::SeqCst);
        TickGuard {
            counters: self.inner.clone(),
        }
    }
}

struct TickGuard {
    counters: Arc<TickCounters>,
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Reconciler {
    registry: Arc<dyn Registry>,
    table: Arc<dyn RoutingTable>,
    settings: ReconcileSettings,
    self_address: String,
    self_peer_id: PeerId,
    /// Consecutive probe failures per address, reset on success.
    failures: HashMap<String, u32>,
    stats: TickStats,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn Registry>,
        table: Arc<dyn RoutingTable>,
        settings: ReconcileSettings,
        self_address: String,
        self_peer_id: PeerId,
    ) -> Self {
        Self {
            registry,
            table,
            settings,
            self_address,
            self_peer_id,
            failures: HashMap::new(),
            stats: TickStats::default(),
        }
    }

    pub fn stats(&self) -> TickStats {
        self.stats.clone()
    }

    /// Runs one reconciliation tick. Only a failed fetch is an error.
    pub async fn tick(&mut self) -> Result<TickReport, RegistryError> {
        let _guard = self.stats.enter();
        let started = Instant::now();

        let peers = match self.registry.list_bootstrap_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                metrics::record_registry_error("list_bootstrap_peers");
                metrics::record_tick("abandoned");
                events::reconciliation_abandoned(&e.to_string());
                return Err(e);
            }
        };

        let candidates = self.candidates(&peers);
        let mut report = TickReport {
            examined: candidates.len(),
            ..TickReport::default()
        };

        let mut outcomes: Vec<(usize, String, bool)> = stream::iter(
            candidates.into_iter().enumerate().map(|(index, address)| {
                let table = self.table.clone();
                let timeout = self.settings.probe_timeout;
                async move {
                    let reachable = probe(table.as_ref(), &address, timeout).await;
                    (index, address, reachable)
                }
            }),
        )
        .buffer_unordered(self.settings.probe_concurrency.max(1))
        .collect()
        .await;
        outcomes.sort_by_key(|(index, _, _)| *index);

        if let Err(e) = self.table.bootstrap().await {
            warn!(error = %e, "Routing table bootstrap failed");
        }

        let mut to_prune = Vec::new();
        for (_, address, reachable) in outcomes {
            if reachable {
                self.failures.remove(&address);
                report.reachable.push(address);
                continue;
            }
            let strikes = self.failures.entry(address.clone()).or_insert(0);
            *strikes += 1;
            if *strikes >= self.settings.prune_after_failures {
                to_prune.push((address.clone(), *strikes));
            } else {
                debug!(address = %address, strikes = *strikes, "Bootstrap peer unreachable, below prune threshold");
            }
            report.unreachable.push(address);
        }

        for (address, strikes) in to_prune {
            match self.registry.remove_bootstrap_peer(&address).await {
                Ok(()) => {
                    self.failures.remove(&address);
                    events::bootstrap_peer_pruned(&address, strikes);
                    metrics::record_pruned();
                    report.pruned.push(address);
                }
                Err(e) => {
                    // The strike count is kept, so the next tick tries again.
                    warn!(address = %address, error = %e, "Failed to prune bootstrap peer");
                    metrics::record_registry_error("remove_bootstrap_peer");
                    report.removal_failures.push(address);
                }
            }
        }

        // Forget strikes for addresses that left the set some other way.
        let present: HashSet<&String> = peers.iter().collect();
        self.failures.retain(|address, _| present.contains(address));

        metrics::set_bootstrap_view(peers.len(), report.reachable.len());
        metrics::record_tick("completed");
        events::reconciliation_completed(
            report.examined,
            report.reachable.len(),
            report.pruned.len(),
            report.removal_failures.len(),
            started.elapsed(),
        );
        Ok(report)
    }

    /// Distinct addresses to probe, in registry order, excluding our own.
    fn candidates(&self, peers: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        peers
            .iter()
            .filter(|address| !self.is_self(address))
            .filter(|address| seen.insert(address.as_str()))
            .cloned()
            .collect()
    }

    fn is_self(&self, address: &str) -> bool {
        if address == self.self_address {
            return true;
        }
        matches!(PeerDescriptor::parse(address), Ok(d) if d.peer_id == self.self_peer_id)
    }
}

async fn probe(table: &dyn RoutingTable, address: &str, timeout: Duration) -> bool {
    let descriptor = match PeerDescriptor::parse(address) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            warn!(address = %address, error = %e, "Malformed bootstrap address");
            return false;
        }
    };

    let started = Instant::now();
    let reachable = match tokio::time::timeout(timeout, table.connect(&descriptor, timeout)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(address = %address, error = %e, "Bootstrap peer unreachable");
            false
        }
        Err(_) => {
            debug!(address = %address, timeout = ?timeout, "Bootstrap peer probe timed out");
            false
        }
    };
    metrics::record_probe_duration(reachable, started.elapsed());
    reachable
}

/// Handle to the running reconciliation task.
pub struct ReconcileTask {
    shutdown_tx: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
    stats: TickStats,
}

impl ReconcileTask {
    pub fn stats(&self) -> TickStats {
        self.stats.clone()
    }

    /// Stops the timer, cancels an in-flight tick and waits for the task.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Reconciliation task ended abnormally");
        }
    }
}

/// Runs `reconciler` every `settings.interval`, first one interval after start.
pub fn spawn_reconciler(mut reconciler: Reconciler) -> ReconcileTask {
    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<()>();
    let stats = reconciler.stats();
    let period = reconciler.settings.interval;

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await; // Skip first immediate tick

        info!(interval = ?period, "Reconciliation scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    metrics::record_tick("cancelled");
                    debug!("In-flight reconciliation tick cancelled");
                    break;
                }
                result = reconciler.tick() => {
                    if let Err(e) = result {
                        debug!(error = %e, "Tick abandoned, waiting for next interval");
                    }
                }
            }
        }
        info!("Reconciliation scheduler stopped");
    });

    ReconcileTask {
        shutdown_tx,
        handle,
        stats,
    }
}

//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `fogmesh_reconciliation_ticks_total` - counter of ticks by outcome
//! - `fogmesh_bootstrap_peers_pruned_total` - counter of pruned addresses
//! - `fogmesh_bootstrap_peers_reachable` - gauge of reachable addresses in the last tick
//! - `fogmesh_bootstrap_set_size` - gauge of the bootstrap set size in the last tick
//! - `fogmesh_peer_probe_duration_seconds` - histogram of reachability probe times
//! - `fogmesh_mdns_discoveries_total` - counter of LAN discoveries
//! - `fogmesh_registry_errors_total` - counter of registry failures by operation

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Installs the global Prometheus recorder. Call once per process.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metric_descriptions();
    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    describe_counter!(
        "fogmesh_reconciliation_ticks_total",
        "Reconciliation ticks by outcome (completed, abandoned, cancelled)"
    );
    describe_counter!(
        "fogmesh_bootstrap_peers_pruned_total",
        "Bootstrap addresses removed for being unreachable"
    );
    describe_gauge!(
        "fogmesh_bootstrap_peers_reachable",
        "Reachable bootstrap addresses seen by the last tick"
    );
    describe_gauge!(
        "fogmesh_bootstrap_set_size",
        "Bootstrap set size as fetched by the last tick"
    );
    describe_histogram!(
        "fogmesh_peer_probe_duration_seconds",
        "Duration of bootstrap peer reachability probes in seconds"
    );
    describe_counter!(
        "fogmesh_mdns_discoveries_total",
        "Peers reported by local mDNS discovery"
    );
    describe_counter!(
        "fogmesh_registry_errors_total",
        "Registry operations that returned an error"
    );
}

pub fn record_tick(outcome: &'static str) {
    counter!("fogmesh_reconciliation_ticks_total", "outcome" => outcome).increment(1);
}

pub fn record_pruned() {
    counter!("fogmesh_bootstrap_peers_pruned_total").increment(1);
}

pub fn set_bootstrap_view(set_size: usize, reachable: usize) {
    gauge!("fogmesh_bootstrap_set_size").set(set_size as f64);
    gauge!("fogmesh_bootstrap_peers_reachable").set(reachable as f64);
}

pub fn record_probe_duration(reachable: bool, duration: Duration) {
    histogram!(
        "fogmesh_peer_probe_duration_seconds",
        "reachable" => if reachable { "true" } else { "false" }
    )
    .record(duration.as_secs_f64());
}

pub fn record_mdns_discovery() {
    counter!("fogmesh_mdns_discoveries_total").increment(1);
}

pub fn record_registry_error(operation: &'static str) {
    counter!("fogmesh_registry_errors_total", "operation" => operation).increment(1);
}

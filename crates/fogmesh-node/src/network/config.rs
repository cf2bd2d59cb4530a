//! Network Configuration
//!
//! Centralized configuration for transport, discovery and reconciliation
//! settings with environment variable overrides.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Network configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    // Connection settings
    /// Idle connection timeout before closing
    pub connection_idle_timeout: Duration,

    /// Maximum time to wait for the swarm to report its first listen address
    pub listen_wait_timeout: Duration,

    /// Extra wait for a routable interface address when bound to a wildcard
    pub listen_settle_timeout: Duration,

    /// Capacity of the swarm command channel
    pub command_buffer: usize,

    // Reconciliation settings
    /// Interval between reconciliation ticks (env: RECONCILE_INTERVAL_SECS)
    pub reconcile_interval: Duration,

    /// Per-peer timeout for reachability probes (env: PROBE_TIMEOUT_SECS)
    pub probe_timeout: Duration,

    /// Maximum concurrent reachability probes within a tick (env: PROBE_CONCURRENCY)
    pub probe_concurrency: usize,

    /// Consecutive failed probes before an address is pruned (env: PRUNE_AFTER_FAILURES)
    pub prune_after_failures: u32,

    // Local discovery settings
    /// Timeout for connecting to an mDNS-discovered peer
    pub mdns_connect_timeout: Duration,

    // Kademlia DHT settings
    /// Query timeout for Kademlia DHT
    pub kademlia_query_timeout: Duration,

    /// Parallelism for Kademlia queries
    pub kademlia_parallelism: NonZeroUsize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connection_idle_timeout: Duration::from_secs(300),
            listen_wait_timeout: Duration::from_secs(5),
            listen_settle_timeout: Duration::from_millis(500),
            command_buffer: 256,

            reconcile_interval: Duration::from_secs(5 * 60),
            probe_timeout: Duration::from_secs(10),
            probe_concurrency: 16,
            prune_after_failures: 1,

            mdns_connect_timeout: Duration::from_secs(10),

            kademlia_query_timeout: Duration::from_secs(30),
            kademlia_parallelism: NonZeroUsize::new(3).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl NetworkConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("RECONCILE_INTERVAL_SECS") {
            config.reconcile_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(secs) = env_parse::<u64>("PROBE_TIMEOUT_SECS") {
            config.probe_timeout = Duration::from_secs(secs.max(1));
        }

        if let Some(concurrency) = env_parse::<usize>("PROBE_CONCURRENCY") {
            config.probe_concurrency = concurrency.max(1);
        }

        if let Some(threshold) = env_parse::<u32>("PRUNE_AFTER_FAILURES") {
            config.prune_after_failures = threshold.max(1);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.reconcile_interval, Duration::from_secs(300));
        assert_eq!(config.mdns_connect_timeout, Duration::from_secs(10));
        assert_eq!(config.prune_after_failures, 1);
        assert!(config.probe_concurrency > 0);
    }
}

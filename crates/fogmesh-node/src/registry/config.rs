//! Registry Configuration
//!
//! Loaded from the YAML file named by `--registry-config`. Only the
//! `registry:` section is read, so the file can be shared with other tools.
//!
//! ```yaml
//! registry:
//!   backend: etcd
//!   endpoints: ["http://127.0.0.1:2379"]
//!   namespace: fogmesh
//!   connect:
//!     initial_backoff_ms: 500
//!     max_backoff_ms: 10000
//!     max_elapsed_secs: 60
//!   max_write_attempts: 5
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    Etcd,
    /// Process-local ledger, for single-node trials and tests.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectBackoff {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_elapsed_secs: u64,
}

impl Default for ConnectBackoff {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            max_elapsed_secs: 60,
        }
    }
}

impl ConnectBackoff {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub connect: ConnectBackoff,
    /// Attempts per bootstrap-set write before giving up on contention.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    registry: RegistryConfig,
}

fn default_namespace() -> String {
    "fogmesh".to_string()
}

fn default_max_write_attempts() -> u32 {
    5
}

impl RegistryConfig {
    /// In-memory ledger with default settings.
    pub fn memory() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            endpoints: Vec::new(),
            namespace: default_namespace(),
            connect: ConnectBackoff::default(),
            max_write_attempts: default_max_write_attempts(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadRegistryConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|e| match e {
            ParseFailure::Yaml(source) => ConfigError::ParseRegistryConfig {
                path: path.to_path_buf(),
                source,
            },
            ParseFailure::Invalid(e) => e,
        })
    }

    fn from_yaml(raw: &str) -> Result<Self, ParseFailure> {
        let file: RegistryFile = serde_yaml::from_str(raw).map_err(ParseFailure::Yaml)?;
        file.registry.validate().map_err(ParseFailure::Invalid)?;
        Ok(file.registry)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == RegistryBackend::Etcd && self.endpoints.is_empty() {
            return Err(ConfigError::InvalidRegistryConfig(
                "etcd backend needs at least one endpoint".to_string(),
            ));
        }
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(ConfigError::InvalidRegistryConfig(format!(
                "namespace `{}` must be a non-empty single path segment",
                self.namespace
            )));
        }
        if self.max_write_attempts == 0 {
            return Err(ConfigError::InvalidRegistryConfig(
                "max_write_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

enum ParseFailure {
    Yaml(serde_yaml::Error),
    Invalid(ConfigError),
}

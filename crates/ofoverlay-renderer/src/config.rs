//! Renderer configuration and on-disk documents.
//!
//! Configuration and snapshot files are YAML unless the file name ends in
//! `.json`. Missing fields fall back to [`RendererConfig::default`].

use crate::endpoint::EndpointRecord;
use crate::policy::{StaticPolicy, StaticTunnels};
use ofoverlay_types::{DeviceId, MacAddress};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// YAML document is malformed.
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    /// JSON document is malformed.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Document parsed but violates a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Flow table ids of the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableIds {
    pub port_security: u8,
    pub source_mapper: u8,
    pub destination_mapper: u8,
    pub policy_enforcer: u8,
}

impl Default for TableIds {
    fn default() -> Self {
        Self {
            port_security: 0,
            source_mapper: 1,
            destination_mapper: 2,
            policy_enforcer: 3,
        }
    }
}

impl TableIds {
    /// Stage tables must be strictly increasing: every stage's rules goto
    /// the next stage's table, and OpenFlow only allows forward gotos.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ids = [
            self.port_security,
            self.source_mapper,
            self.destination_mapper,
            self.policy_enforcer,
        ];
        if ids.windows(2).all(|w| w[0] < w[1]) {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "table ids must be strictly increasing, got {:?}",
                ids
            )))
        }
    }
}

/// Configuration for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Pipeline table ids.
    pub tables: TableIds,
    /// MAC address of the distributed virtual router.
    pub router_mac: MacAddress,
    /// Interval between reconciliation passes in milliseconds.
    pub sync_interval_ms: u64,
    /// Upper bound on a single device-state store request in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            tables: TableIds::default(),
            router_mac: MacAddress::new([0x88, 0xf0, 0x31, 0xb5, 0x12, 0xb5]),
            sync_interval_ms: 1000,
            store_timeout_ms: 5000,
        }
    }
}

impl RendererConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration file without validating it, for callers
    /// that apply overrides first.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        load_document(path)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tables.validate()?;
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "store_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Initial state handed to the renderer at startup.
///
/// Stands in for the policy, tunnel and endpoint feeds a deployment
/// connects to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub endpoints: Vec<EndpointRecord>,
    pub policy: StaticPolicy,
    pub tunnels: StaticTunnels,
    /// Fixed device ordinals; devices not listed are allocated on demand.
    pub device_ordinals: BTreeMap<DeviceId, u32>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_document(path)
    }
}

/// Reads a YAML or JSON document, chosen by file extension.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }
}

//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::AdmissionConfig;
use crate::error::{ClientError, Result};
use crate::retry::RetryOptions;
use crate::transport::CallOptions;

/// Settings of the buffered write path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    /// Threads starting buffered RPCs; 0 starts them on the caller (default: 2).
    pub async_worker_count: usize,
    /// Maximum buffered RPCs in flight per mutator (default: 50).
    pub max_inflight_rpcs: usize,
    /// Maximum estimated bytes in flight per mutator (default: 16 MiB).
    pub max_memory_bytes: u64,
}

impl Default for BulkOptions {
    fn default() -> Self {
        let admission = AdmissionConfig::default();
        Self {
            async_worker_count: 2,
            max_inflight_rpcs: admission.max_inflight_operations,
            max_memory_bytes: admission.max_memory_bytes,
        }
    }
}

impl BulkOptions {
    /// Admission limits for one mutator.
    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            max_memory_bytes: self.max_memory_bytes,
            max_inflight_operations: self.max_inflight_rpcs,
        }
    }
}

/// Options of a [`TabletSession`](crate::session::TabletSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabletOptions {
    /// Project owning the cluster. Required.
    pub project_id: String,
    /// Zone of the cluster. Required.
    pub zone_id: String,
    /// Cluster identifier. Required.
    pub cluster_id: String,
    /// User agent sent with every call (default: `tabletkv-client/<version>`).
    pub user_agent: String,
    /// Host of the data service (default: `data.tabletkv.local`).
    pub data_host: String,
    /// Port of the data service (default: 443).
    pub port: u16,
    /// Number of channels opened eagerly (default: 4).
    pub channel_count: usize,
    /// Deadline of a single attempt; `None` waits indefinitely (default: none).
    pub call_timeout_ms: Option<u64>,
    /// Retry settings.
    pub retry: RetryOptions,
    /// Buffered write settings.
    pub bulk: BulkOptions,
}

impl Default for TabletOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            zone_id: String::new(),
            cluster_id: String::new(),
            user_agent: format!("tabletkv-client/{}", env!("CARGO_PKG_VERSION")),
            data_host: "data.tabletkv.local".to_string(),
            port: 443,
            channel_count: 4,
            call_timeout_ms: None,
            retry: RetryOptions::default(),
            bulk: BulkOptions::default(),
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ClientError::MissingConfig { field });
    }
    Ok(())
}

impl TabletOptions {
    /// Options for one cluster, everything else defaulted.
    pub fn new(
        project_id: impl Into<String>,
        zone_id: impl Into<String>,
        cluster_id: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            zone_id: zone_id.into(),
            cluster_id: cluster_id.into(),
            user_agent: user_agent.into(),
            ..Default::default()
        }
    }

    /// Loads options from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| ClientError::InvalidConfig {
                reason: format!("{}: {}", path.display(), e),
            }),
            "json" => serde_json::from_str(&contents).map_err(|e| ClientError::InvalidConfig {
                reason: format!("{}: {}", path.display(), e),
            }),
            _ => Err(ClientError::InvalidConfig {
                reason: format!("unsupported config file extension: {}", ext),
            }),
        }
    }

    /// Checks required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        require("project_id", &self.project_id)?;
        require("zone_id", &self.zone_id)?;
        require("cluster_id", &self.cluster_id)?;
        require("user_agent", &self.user_agent)?;
        require("data_host", &self.data_host)?;
        if self.channel_count == 0 {
            return Err(ClientError::InvalidConfig {
                reason: "channel_count must be at least 1".to_string(),
            });
        }
        if self.bulk.max_inflight_rpcs == 0 {
            return Err(ClientError::InvalidConfig {
                reason: "bulk.max_inflight_rpcs must be at least 1".to_string(),
            });
        }
        self.retry.validate()
    }

    /// `projects/{project}/zones/{zone}/clusters/{cluster}`.
    pub fn cluster_name(&self) -> String {
        format!(
            "projects/{}/zones/{}/clusters/{}",
            self.project_id, self.zone_id, self.cluster_id
        )
    }

    /// `{cluster_name}/tables/{table}`.
    pub fn table_name(&self, table: &str) -> String {
        format!("{}/tables/{}", self.cluster_name(), table)
    }

    /// `host:port` of the data service.
    pub fn data_endpoint(&self) -> String {
        format!("{}:{}", self.data_host, self.port)
    }

    /// Per-call options derived from `call_timeout_ms`.
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            deadline: self.call_timeout_ms.map(Duration::from_millis),
        }
    }
}

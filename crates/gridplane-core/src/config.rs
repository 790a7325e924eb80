//! agent.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent label; selects which northbound records this agent owns.
    pub label: String,
    pub northbound: NorthboundConfig,
    #[serde(default)]
    pub dataplane: DataplaneConfig,
    #[serde(default)]
    pub resync: ResyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NorthboundConfig {
    /// Path to the desired-state snapshot file (JSON array of records).
    pub snapshot: PathBuf,
    /// Snapshot poll interval in seconds.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataplaneConfig {
    /// Timeout for a single dataplane RPC, in seconds. A timed-out
    /// operation is treated as failed, not retried in-batch.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncConfig {
    /// Periodic full-resync interval in seconds. Zero disables the
    /// periodic pass; the startup resync always runs.
    #[serde(default = "default_resync_secs")]
    pub interval_secs: u64,
}

fn default_poll_secs() -> u64 {
    2
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

fn default_resync_secs() -> u64 {
    300
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self { rpc_timeout_secs: default_rpc_timeout_secs() }
    }
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self { interval_secs: default_resync_secs() }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.northbound.poll_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.dataplane.rpc_timeout_secs)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        match self.resync.interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

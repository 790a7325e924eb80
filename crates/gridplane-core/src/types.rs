//! Shared record types used across Gridplane crates.

use serde::{Deserialize, Serialize};

/// Where a value was learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Declared by the operator through the northbound store (desired).
    Northbound,
    /// Observed in a dataplane dump (actual).
    Southbound,
}

/// One key/value configuration record.
///
/// Values are immutable snapshots: a configuration change replaces the
/// value bound to a key, it never mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvPair {
    pub key: String,
    pub value: serde_json::Value,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self { key: key.into(), value }
    }
}

/// One object returned from a descriptor's dataplane dump.
///
/// `metadata` carries rediscovered runtime state (typically the
/// dataplane-assigned handle) so the engine can re-seed the metadata
/// index after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedKv {
    pub key: String,
    pub value: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub origin: Origin,
}

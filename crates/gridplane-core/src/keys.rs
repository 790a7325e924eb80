//! Northbound key namespace.
//!
//! Desired-state records live in a hierarchical keyspace of the form
//!
//! ```text
//! <root>/<agent-label>/config/<module>/<version>/<type>/<name...>
//! ```
//!
//! e.g. `gridplane/vpp1/config/net/v1/interface/eth0`. The trailing
//! name segment may itself contain `/` (composite names such as
//! `spd/10/interface/eth0`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keyspace root under which all Gridplane records live.
pub const KEY_ROOT: &str = "gridplane";

/// Marker segment separating agent identity from record identity.
const CONFIG_SEGMENT: &str = "config";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("key does not start with root '{KEY_ROOT}/': {0}")]
    WrongRoot(String),

    #[error("key is missing the '{CONFIG_SEGMENT}' segment: {0}")]
    NotConfig(String),

    #[error("key has too few segments: {0}")]
    Truncated(String),
}

/// A northbound key split into its identifying parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedKey {
    /// Agent label (which agent instance the record targets).
    pub label: String,
    /// Configuration module, e.g. `net` or `ipsec`.
    pub module: String,
    /// Module schema version, e.g. `v1`.
    pub version: String,
    /// Record type within the module, e.g. `interface`.
    pub kind: String,
    /// Instance name; may contain further `/` separators.
    pub name: String,
}

/// Build a full northbound key from its parts.
pub fn build_key(label: &str, module: &str, version: &str, kind: &str, name: &str) -> String {
    format!("{KEY_ROOT}/{label}/{CONFIG_SEGMENT}/{module}/{version}/{kind}/{name}")
}

/// Parse a full northbound key.
pub fn parse_key(key: &str) -> Result<ParsedKey, KeyError> {
    let rest = key
        .strip_prefix(KEY_ROOT)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| KeyError::WrongRoot(key.to_string()))?;

    let (label, rest) = rest
        .split_once('/')
        .ok_or_else(|| KeyError::Truncated(key.to_string()))?;

    let rest = rest
        .strip_prefix(CONFIG_SEGMENT)
        .and_then(|r| r.strip_prefix('/'))
        .ok_or_else(|| KeyError::NotConfig(key.to_string()))?;

    // module/version/kind/name..., name keeps any remaining slashes.
    let mut segments = rest.splitn(4, '/');
    let module = segments.next().filter(|s| !s.is_empty());
    let version = segments.next().filter(|s| !s.is_empty());
    let kind = segments.next().filter(|s| !s.is_empty());
    let name = segments.next().filter(|s| !s.is_empty());

    match (module, version, kind, name) {
        (Some(module), Some(version), Some(kind), Some(name)) => Ok(ParsedKey {
            label: label.to_string(),
            module: module.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        }),
        _ => Err(KeyError::Truncated(key.to_string())),
    }
}

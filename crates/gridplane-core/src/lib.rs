//! gridplane-core — shared types, key namespace, and agent configuration.
//!
//! Everything in this crate is consumed by both the reconciliation
//! engine (`gridplane-kvs`) and the daemon (`gridplaned`):
//!
//! - **`types`** — origin tags and key/value record shapes
//! - **`keys`** — the northbound hierarchical key namespace
//! - **`config`** — `agent.toml` parsing

pub mod config;
pub mod keys;
pub mod types;

pub use config::AgentConfig;
pub use keys::{KeyError, ParsedKey, build_key, parse_key};
pub use types::{KvPair, Origin, RetrievedKv};

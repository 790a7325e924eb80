//! The descriptor contract — one registered handler per value type.
//!
//! A descriptor owns every dataplane-facing operation for its type.
//! Descriptors are stateless with respect to the engine's graph: all
//! durable state they need is either passed in (old/new value, old
//! metadata) or lives in their own metadata map.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use gridplane_core::{KvPair, RetrievedKv};

/// Opaque, descriptor-owned runtime state for one key — typically the
/// dataplane-assigned numeric handle plus whatever rediscovery needs.
pub type Metadata = serde_json::Value;

/// A prerequisite declared by a descriptor for one of its values: the
/// named key must be realized before the value's operation may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Human-readable label, surfaced in "pending on <dependency>" status.
    pub label: String,
    /// Key that must already be realized.
    pub key: String,
}

impl Dependency {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self { label: label.into(), key: key.into() }
    }
}

/// A value failed descriptor-level sanity checks. Always fatal for the
/// key, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid value for {key}: {reason}")]
pub struct ValidationError {
    pub key: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { key: key.into(), reason: reason.into() }
    }
}

/// A registered handler for exactly one configuration value type.
///
/// Only `name`, `owns_key`, and the CRUD operations are mandatory;
/// everything else defaults to the behavior of a dependency-free,
/// non-derivable, dump-less type.
#[async_trait]
pub trait Descriptor: Send + Sync {
    /// Unique descriptor name within the registry.
    fn name(&self) -> &str;

    /// Key selector: whether this descriptor handles the given key.
    /// Each descriptor recognizes its own keys; the engine never keeps
    /// a central key-to-type switch.
    fn owns_key(&self, key: &str) -> bool;

    /// Logical object name under which metadata is filed in this
    /// descriptor's metadata map. Defaults to the full key.
    fn key_label(&self, key: &str) -> String {
        key.to_string()
    }

    /// Sanity-check a value before any dependency analysis.
    fn validate(&self, _key: &str, _value: &Value) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Create the object in the dataplane. Returned metadata is stored
    /// by the engine and threaded through later update/delete calls.
    async fn create(&self, key: &str, value: &Value) -> anyhow::Result<Option<Metadata>>;

    /// Update an existing object in place.
    async fn update(
        &self,
        key: &str,
        old: &Value,
        new: &Value,
        old_metadata: Option<&Metadata>,
    ) -> anyhow::Result<Option<Metadata>>;

    /// Whether this particular old→new change must be applied as
    /// delete-then-create instead of an in-place update.
    fn update_with_recreate(
        &self,
        _key: &str,
        _old: &Value,
        _new: &Value,
        _metadata: Option<&Metadata>,
    ) -> bool {
        false
    }

    /// Remove the object from the dataplane.
    async fn delete(&self, key: &str, value: &Value, metadata: Option<&Metadata>)
    -> anyhow::Result<()>;

    /// Whether this descriptor can dump actual state. Types without a
    /// dump (e.g. derived bindings realized implicitly) leave this
    /// false and are skipped during resync retrieval.
    fn retrieve_supported(&self) -> bool {
        false
    }

    /// Dump this descriptor's view of actual dataplane state. The
    /// correlate hint carries the desired values owned by this
    /// descriptor, for matching dumped objects against externally
    /// allocated indices.
    async fn retrieve(&self, _correlate: &[KvPair]) -> anyhow::Result<Vec<RetrievedKv>> {
        Ok(Vec::new())
    }

    /// Keys that must be realized before this value can be applied.
    fn dependencies(&self, _key: &str, _value: &Value) -> Vec<Dependency> {
        Vec::new()
    }

    /// Additional (key, value) pairs derived from this value. Each is
    /// tracked as an independent node with an implicit dependency on
    /// this key, and cascade-deleted with it.
    fn derived_values(&self, _key: &str, _value: &Value) -> Vec<KvPair> {
        Vec::new()
    }

    /// Order-insensitive, field-normalizing equivalence check used for
    /// resync diffing and update short-circuiting. Defaults to
    /// structural equality.
    fn value_comparator(&self, _key: &str, old: &Value, new: &Value) -> bool {
        old == new
    }

    /// Classify a create/update/delete failure. Retriable (transient)
    /// failures are re-attempted on the next resync; non-retriable
    /// failures stay failed until the desired value changes.
    fn is_retriable_failure(&self, _err: &anyhow::Error) -> bool {
        true
    }
}

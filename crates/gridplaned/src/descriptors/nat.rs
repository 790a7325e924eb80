//! NAT address pool descriptor.
//!
//! Pools are dump-capable, so the resync pass can both rediscover
//! handles after a restart and delete pools nobody desires anymore.
//! The address list is a set: reordering it is not a change.

use async_trait::async_trait;
use serde_json::{Value, json};

use gridplane_core::{KvPair, Origin, RetrievedKv, keys::build_key};
use gridplane_kvs::{Descriptor, Metadata, ValidationError};

use super::{handle_of, normalize_lists, owned_key};
use crate::dataplane::DataplaneClient;

pub const KIND: &str = "pool";
pub const MODULE: &str = "nat";
pub const VERSION: &str = "v1";

const SET_FIELDS: &[&str] = &["addresses"];

pub struct NatPoolDescriptor {
    label: String,
    dataplane: DataplaneClient,
}

impl NatPoolDescriptor {
    pub fn new(label: impl Into<String>, dataplane: DataplaneClient) -> Self {
        Self { label: label.into(), dataplane }
    }

    pub fn key(label: &str, name: &str) -> String {
        build_key(label, MODULE, VERSION, KIND, name)
    }
}

#[async_trait]
impl Descriptor for NatPoolDescriptor {
    fn name(&self) -> &str {
        "nat-pool"
    }

    fn owns_key(&self, key: &str) -> bool {
        owned_key(key, &self.label, MODULE, KIND).is_some()
    }

    fn key_label(&self, key: &str) -> String {
        owned_key(key, &self.label, MODULE, KIND)
            .map(|parsed| parsed.name)
            .unwrap_or_else(|| key.to_string())
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), ValidationError> {
        match value.get("addresses").and_then(Value::as_array) {
            None => Err(ValidationError::new(key, "addresses is required")),
            Some(addresses) if addresses.is_empty() => {
                Err(ValidationError::new(key, "addresses must not be empty"))
            }
            Some(_) => Ok(()),
        }
    }

    async fn create(&self, key: &str, value: &Value) -> anyhow::Result<Option<Metadata>> {
        let name = self.key_label(key);
        let handle = self.dataplane.create_object(KIND, &name, value).await?;
        Ok(Some(json!({ "handle": handle })))
    }

    async fn update(
        &self,
        _key: &str,
        _old: &Value,
        new: &Value,
        old_metadata: Option<&Metadata>,
    ) -> anyhow::Result<Option<Metadata>> {
        let handle = handle_of(old_metadata)?;
        self.dataplane.update_object(handle, new).await?;
        Ok(old_metadata.cloned())
    }

    async fn delete(
        &self,
        _key: &str,
        _value: &Value,
        metadata: Option<&Metadata>,
    ) -> anyhow::Result<()> {
        self.dataplane.delete_object(handle_of(metadata)?).await
    }

    fn retrieve_supported(&self) -> bool {
        true
    }

    async fn retrieve(&self, _correlate: &[KvPair]) -> anyhow::Result<Vec<RetrievedKv>> {
        let objects = self.dataplane.dump(KIND).await?;
        Ok(objects
            .into_iter()
            .map(|o| RetrievedKv {
                key: Self::key(&self.label, &o.name),
                value: o.attrs,
                metadata: Some(json!({ "handle": o.handle })),
                origin: Origin::Southbound,
            })
            .collect())
    }

    fn value_comparator(&self, _key: &str, old: &Value, new: &Value) -> bool {
        normalize_lists(old, SET_FIELDS) == normalize_lists(new, SET_FIELDS)
    }
}

//! Network interface descriptor.
//!
//! The simplest reference descriptor: no dependencies, no derived
//! values, dump-capable. Metadata is the dataplane-assigned handle,
//! which other types resolve through the metadata index when they
//! reference an interface by name.

use async_trait::async_trait;
use serde_json::{Value, json};

use gridplane_core::{KvPair, Origin, RetrievedKv, keys::build_key};
use gridplane_kvs::{Descriptor, Metadata, ValidationError};

use super::{handle_of, owned_key};
use crate::dataplane::DataplaneClient;

pub const KIND: &str = "interface";
pub const MODULE: &str = "net";
pub const VERSION: &str = "v1";

pub struct InterfaceDescriptor {
    label: String,
    dataplane: DataplaneClient,
}

impl InterfaceDescriptor {
    pub fn new(label: impl Into<String>, dataplane: DataplaneClient) -> Self {
        Self { label: label.into(), dataplane }
    }

    /// Full northbound key of an interface on this agent.
    pub fn key(label: &str, name: &str) -> String {
        build_key(label, MODULE, VERSION, KIND, name)
    }
}

#[async_trait]
impl Descriptor for InterfaceDescriptor {
    fn name(&self) -> &str {
        "interface"
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
        if let Some(mtu) = value.get("mtu").and_then(Value::as_u64)
            && mtu == 0
        {
            return Err(ValidationError::new(key, "mtu must be non-zero"));
        }
        Ok(())
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

    fn is_retriable_failure(&self, err: &anyhow::Error) -> bool {
        // "already exists" will keep failing until a resync reconciles
        // the dump, so retrying the same op is pointless.
        !err.to_string().contains("already exists")
    }
}

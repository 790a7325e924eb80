//! IPsec security association descriptor.
//!
//! SAs are immutable on the dataplane side: any change to a realized SA
//! is applied as delete-then-create rather than an in-place update.

use async_trait::async_trait;
use serde_json::{Value, json};

use gridplane_core::keys::build_key;
use gridplane_kvs::{Descriptor, Metadata, ValidationError};

use super::{handle_of, owned_key};
use crate::dataplane::DataplaneClient;

pub const KIND: &str = "sa";
pub const MODULE: &str = "ipsec";
pub const VERSION: &str = "v1";

pub struct SaDescriptor {
    label: String,
    dataplane: DataplaneClient,
}

impl SaDescriptor {
    pub fn new(label: impl Into<String>, dataplane: DataplaneClient) -> Self {
        Self { label: label.into(), dataplane }
    }

    pub fn key(label: &str, name: &str) -> String {
        build_key(label, MODULE, VERSION, KIND, name)
    }
}

#[async_trait]
impl Descriptor for SaDescriptor {
    fn name(&self) -> &str {
        "security-association"
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
        match value.get("spi").and_then(Value::as_u64) {
            None => Err(ValidationError::new(key, "spi is required")),
            Some(0) => Err(ValidationError::new(key, "spi must be non-zero")),
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
        _new: &Value,
        old_metadata: Option<&Metadata>,
    ) -> anyhow::Result<Option<Metadata>> {
        // Unreachable while update_with_recreate is unconditional; kept
        // total so the contract holds if that ever changes.
        Ok(old_metadata.cloned())
    }

    fn update_with_recreate(
        &self,
        _key: &str,
        _old: &Value,
        _new: &Value,
        _metadata: Option<&Metadata>,
    ) -> bool {
        true
    }

    async fn delete(
        &self,
        _key: &str,
        _value: &Value,
        metadata: Option<&Metadata>,
    ) -> anyhow::Result<()> {
        self.dataplane.delete_object(handle_of(metadata)?).await
    }
}

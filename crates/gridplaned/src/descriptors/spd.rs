//! Security policy database descriptor and its derived bindings.
//!
//! An SPD value names the interfaces it applies to and the security
//! associations its policies reference:
//!
//! ```json
//! { "interfaces": ["eth0"], "security_associations": ["sa1"], ... }
//! ```
//!
//! Each listed name is expanded into a derived binding value
//! (`spd-binding/<spd>/interface/<name>` or `.../sa/<name>`) that
//! depends on the bound object's key. The SPD itself therefore installs
//! immediately, while its bindings wait for their targets and follow
//! them through replacement.

use async_trait::async_trait;
use serde_json::{Value, json};

use gridplane_core::{KvPair, keys::build_key};
use gridplane_kvs::{Dependency, Descriptor, Metadata, ValidationError};

use super::{handle_of, interface, normalize_lists, owned_key, security_association};
use crate::dataplane::DataplaneClient;

pub const KIND: &str = "spd";
pub const BINDING_KIND: &str = "spd-binding";
pub const MODULE: &str = "ipsec";
pub const VERSION: &str = "v1";

/// List fields compared as sets: binding order carries no meaning.
const SET_FIELDS: &[&str] = &["interfaces", "security_associations"];

fn names_of(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub struct SpdDescriptor {
    label: String,
    dataplane: DataplaneClient,
}

impl SpdDescriptor {
    pub fn new(label: impl Into<String>, dataplane: DataplaneClient) -> Self {
        Self { label: label.into(), dataplane }
    }

    pub fn key(label: &str, name: &str) -> String {
        build_key(label, MODULE, VERSION, KIND, name)
    }
}

#[async_trait]
impl Descriptor for SpdDescriptor {
    fn name(&self) -> &str {
        "spd"
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
        for field in SET_FIELDS {
            if let Some(entries) = value.get(*field)
                && !entries.is_array()
            {
                return Err(ValidationError::new(key, format!("{field} must be a list")));
            }
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

    fn derived_values(&self, key: &str, value: &Value) -> Vec<KvPair> {
        let Some(parsed) = owned_key(key, &self.label, MODULE, KIND) else {
            return Vec::new();
        };
        let spd = parsed.name;

        let mut derived = Vec::new();
        for iface in names_of(value, "interfaces") {
            derived.push(KvPair::new(
                build_key(
                    &self.label,
                    MODULE,
                    VERSION,
                    BINDING_KIND,
                    &format!("{spd}/interface/{iface}"),
                ),
                json!({ "spd": spd, "interface": iface }),
            ));
        }
        for sa in names_of(value, "security_associations") {
            derived.push(KvPair::new(
                build_key(
                    &self.label,
                    MODULE,
                    VERSION,
                    BINDING_KIND,
                    &format!("{spd}/sa/{sa}"),
                ),
                json!({ "spd": spd, "sa": sa }),
            ));
        }
        derived
    }

    fn value_comparator(&self, _key: &str, old: &Value, new: &Value) -> bool {
        normalize_lists(old, SET_FIELDS) == normalize_lists(new, SET_FIELDS)
    }
}

/// One SPD ↔ interface/SA attachment, derived from its SPD value.
///
/// Binding names have the form `<spd>/interface/<name>` or
/// `<spd>/sa/<name>`; the target name may itself contain `/` (VPP
/// interface names do).
pub struct SpdBindingDescriptor {
    label: String,
    dataplane: DataplaneClient,
}

impl SpdBindingDescriptor {
    pub fn new(label: impl Into<String>, dataplane: DataplaneClient) -> Self {
        Self { label: label.into(), dataplane }
    }

    /// `(spd, target-kind, target-name)` from a binding name.
    fn split_name(name: &str) -> Option<(&str, &str, &str)> {
        let mut segments = name.splitn(3, '/');
        Some((segments.next()?, segments.next()?, segments.next()?))
    }
}

#[async_trait]
impl Descriptor for SpdBindingDescriptor {
    fn name(&self) -> &str {
        "spd-binding"
    }

    fn owns_key(&self, key: &str) -> bool {
        owned_key(key, &self.label, MODULE, BINDING_KIND).is_some()
    }

    fn key_label(&self, key: &str) -> String {
        owned_key(key, &self.label, MODULE, BINDING_KIND)
            .map(|parsed| parsed.name)
            .unwrap_or_else(|| key.to_string())
    }

    async fn create(&self, key: &str, value: &Value) -> anyhow::Result<Option<Metadata>> {
        let name = self.key_label(key);
        let handle = self
            .dataplane
            .create_object(BINDING_KIND, &name, value)
            .await?;
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

    fn dependencies(&self, key: &str, _value: &Value) -> Vec<Dependency> {
        let Some(parsed) = owned_key(key, &self.label, MODULE, BINDING_KIND) else {
            return Vec::new();
        };
        let Some((_, target_kind, target)) = Self::split_name(&parsed.name) else {
            return Vec::new();
        };
        match target_kind {
            "interface" => vec![Dependency::new(
                "bound-interface",
                build_key(
                    &self.label,
                    interface::MODULE,
                    interface::VERSION,
                    interface::KIND,
                    target,
                ),
            )],
            "sa" => vec![Dependency::new(
                "bound-sa",
                build_key(
                    &self.label,
                    security_association::MODULE,
                    security_association::VERSION,
                    security_association::KIND,
                    target,
                ),
            )],
            _ => Vec::new(),
        }
    }
}

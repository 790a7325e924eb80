//! Reference descriptors.
//!
//! One descriptor per configuration type, each recognizing its own
//! northbound keys and driving the dataplane boundary:
//!
//! - `interface` — dump-capable, metadata carries the handle
//! - `security_association` — validated (SPI != 0), replaced on change
//! - `spd` — security policy database; derives one binding per bound
//!   interface and security association
//! - `nat` — address pool, dump-capable, addresses compared as a set

pub mod interface;
pub mod nat;
pub mod security_association;
pub mod spd;

use std::sync::Arc;

use serde_json::Value;

use gridplane_core::keys::{ParsedKey, parse_key};
use gridplane_kvs::{KvsResult, Metadata, Registry};

use crate::dataplane::DataplaneClient;

pub use interface::InterfaceDescriptor;
pub use nat::NatPoolDescriptor;
pub use security_association::SaDescriptor;
pub use spd::{SpdBindingDescriptor, SpdDescriptor};

/// Register the full reference descriptor set for one agent label.
pub fn register_defaults(
    registry: &mut Registry,
    label: &str,
    dataplane: DataplaneClient,
) -> KvsResult<()> {
    registry.register(Arc::new(InterfaceDescriptor::new(label, dataplane.clone())))?;
    registry.register(Arc::new(SaDescriptor::new(label, dataplane.clone())))?;
    registry.register(Arc::new(SpdDescriptor::new(label, dataplane.clone())))?;
    registry.register(Arc::new(SpdBindingDescriptor::new(label, dataplane.clone())))?;
    registry.register(Arc::new(NatPoolDescriptor::new(label, dataplane)))?;
    Ok(())
}

/// Parse a key and check it targets this agent, module, and type.
fn owned_key(key: &str, label: &str, module: &str, kind: &str) -> Option<ParsedKey> {
    let parsed = parse_key(key).ok()?;
    (parsed.label == label && parsed.module == module && parsed.kind == kind).then_some(parsed)
}

/// The dataplane handle stored in descriptor metadata.
fn handle_of(metadata: Option<&Metadata>) -> anyhow::Result<u32> {
    metadata
        .and_then(|m| m.get("handle"))
        .and_then(Value::as_u64)
        .map(|h| h as u32)
        .ok_or_else(|| anyhow::anyhow!("metadata carries no dataplane handle"))
}

/// Normalize a value for set-style comparison: the named list fields
/// are sorted so that ordering differences do not count as change.
fn normalize_lists(value: &Value, fields: &[&str]) -> Value {
    let mut value = value.clone();
    for field in fields {
        if let Some(list) = value.get_mut(*field).and_then(Value::as_array_mut) {
            list.sort_by_key(|v| v.to_string());
        }
    }
    value
}

//! Descriptor registry.
//!
//! Built once before the scheduler starts and moved into it, so it is
//! immutable during normal operation: new value types are added by
//! registering new descriptors, never by modifying the engine.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::{KvsError, KvsResult};

/// Insertion-ordered map of descriptor name → descriptor.
#[derive(Default)]
pub struct Registry {
    by_name: HashMap<String, Arc<dyn Descriptor>>,
    /// Registration order, used for deterministic resync retrieval.
    order: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Fails if the name is already taken.
    pub fn register(&mut self, descriptor: Arc<dyn Descriptor>) -> KvsResult<()> {
        let name = descriptor.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(KvsError::DuplicateDescriptor(name));
        }
        self.order.push(name.clone());
        self.by_name.insert(name, descriptor);
        Ok(())
    }

    /// Look up a descriptor by name.
    pub fn get(&self, name: &str) -> KvsResult<Arc<dyn Descriptor>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| KvsError::DescriptorNotFound(name.to_string()))
    }

    /// Find the descriptor whose key selector recognizes the key.
    pub fn descriptor_for_key(&self, key: &str) -> Option<Arc<dyn Descriptor>> {
        self.order
            .iter()
            .map(|name| &self.by_name[name])
            .find(|d| d.owns_key(key))
            .cloned()
    }

    /// All descriptors in registration order.
    pub fn all(&self) -> impl Iterator<Item = Arc<dyn Descriptor>> + '_ {
        self.order.iter().map(|name| self.by_name[name].clone())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

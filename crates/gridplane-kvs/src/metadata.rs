//! Metadata index — per-descriptor maps from logical object name to
//! dataplane-assigned runtime metadata.
//!
//! The engine hosts the maps; each descriptor effectively gets a
//! private namespace and may read other descriptors' maps to resolve
//! cross-type references. Writes are serialized with scheduler
//! execution; concurrent reads take the lock briefly.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::descriptor::Metadata;

/// Index value reserved as "unset"/invalid; the allocator never hands
/// it out.
pub const RESERVED_UNSET_INDEX: u32 = 1;

#[derive(Debug)]
struct MapInner {
    entries: HashMap<String, Metadata>,
    next_index: u32,
}

impl Default for MapInner {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_index: RESERVED_UNSET_INDEX + 1,
        }
    }
}

/// One descriptor's name → metadata map, with a monotonically
/// increasing index allocator for minting new dataplane handles.
#[derive(Debug, Default)]
pub struct MetadataMap {
    inner: RwLock<MapInner>,
}

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, name: impl Into<String>, metadata: Metadata) {
        let mut inner = self.inner.write().expect("metadata lock poisoned");
        inner.entries.insert(name.into(), metadata);
    }

    pub fn get(&self, name: &str) -> Option<Metadata> {
        let inner = self.inner.read().expect("metadata lock poisoned");
        inner.entries.get(name).cloned()
    }

    /// Remove one entry. Returns whether it existed.
    pub fn delete(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("metadata lock poisoned");
        inner.entries.remove(name).is_some()
    }

    /// Discard all entries and reset the index allocator. Invoked at
    /// the start of a full resync, before re-population from the dump.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("metadata lock poisoned");
        *inner = MapInner::default();
    }

    /// Mint the next free index. Indices survive `put`/`delete` but
    /// restart after `clear`.
    pub fn alloc_index(&self) -> u32 {
        let mut inner = self.inner.write().expect("metadata lock poisoned");
        let index = inner.next_index;
        inner.next_index += 1;
        index
    }

    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("metadata lock poisoned");
        inner.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("metadata lock poisoned");
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All metadata maps, keyed by descriptor name. Maps are created on
/// first use and live for the life of the engine.
#[derive(Debug, Default)]
pub struct MetadataBroker {
    maps: RwLock<HashMap<String, Arc<MetadataMap>>>,
}

impl MetadataBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map belonging to the named descriptor, created if absent.
    pub fn map_for(&self, descriptor: &str) -> Arc<MetadataMap> {
        {
            let maps = self.maps.read().expect("metadata broker lock poisoned");
            if let Some(map) = maps.get(descriptor) {
                return map.clone();
            }
        }
        let mut maps = self.maps.write().expect("metadata broker lock poisoned");
        maps.entry(descriptor.to_string())
            .or_insert_with(|| Arc::new(MetadataMap::new()))
            .clone()
    }

    /// Read-only view of another descriptor's map, if it exists.
    pub fn reader(&self, descriptor: &str) -> Option<Arc<MetadataMap>> {
        let maps = self.maps.read().expect("metadata broker lock poisoned");
        maps.get(descriptor).cloned()
    }

    /// Clear every map (resync start).
    pub fn clear_all(&self) {
        let maps = self.maps.read().expect("metadata broker lock poisoned");
        for map in maps.values() {
            map.clear();
        }
    }
}

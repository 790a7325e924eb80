//! Graph store — the in-memory picture of every known key/value pair.
//!
//! Each node carries the value snapshot, its origin (desired vs
//! observed), its lifecycle state, descriptor-returned metadata, and
//! edges: declared dependencies (with a reverse index) and derivation
//! (parent ↔ derived children). The store exclusively owns the nodes;
//! descriptors never see it directly.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use gridplane_core::Origin;

use crate::descriptor::{Dependency, Metadata};

/// Lifecycle state of a graph node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum NodeState {
    /// Dependencies unmet; the operation is parked and will replay when
    /// the blocking key is realized.
    Pending { blocked_on: String },
    /// Applied to the dataplane; metadata stored.
    Realized,
    /// Create/update/delete failed. Retriable failures are re-attempted
    /// on the next resync; a failed node never satisfies a dependency.
    Failed { error: String, retriable: bool },
    /// Observed in a dataplane dump with no desired counterpart.
    /// Only resync may delete such an object.
    Retrieved,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub key: String,
    /// Owning descriptor name; empty for property values no descriptor
    /// recognizes (derived bindings that exist without dataplane ops).
    pub descriptor: String,
    pub value: Value,
    pub origin: Origin,
    pub state: NodeState,
    pub metadata: Option<Metadata>,
    /// Value most recently applied to the dataplane. Survives the node
    /// leaving `Realized` (deferral, failed update) so that a replay
    /// goes through update rather than a duplicate create, and a delete
    /// still reaches the stored handle.
    pub last_applied: Option<Value>,
    /// Parent key, when this node is a derived value.
    pub derived_from: Option<String>,
    /// Dependencies declared at the last apply attempt.
    pub dependencies: Vec<Dependency>,
}

/// Per-key status snapshot for the inspection surface.
#[derive(Debug, Clone, Serialize)]
pub struct ValueStatus {
    pub key: String,
    pub descriptor: String,
    pub origin: Origin,
    #[serde(flatten)]
    pub state: NodeState,
    pub derived_from: Option<String>,
    pub metadata: Option<Metadata>,
}

/// In-memory store of all graph nodes plus edge indexes.
#[derive(Debug, Default)]
pub struct GraphStore {
    nodes: BTreeMap<String, Node>,
    /// Reverse dependency index: key → keys whose nodes depend on it.
    dependents: HashMap<String, HashSet<String>>,
    /// Derivation index: parent key → derived child keys, in derivation
    /// order.
    derived: HashMap<String, Vec<String>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node, refreshing both edge indexes.
    pub fn upsert(&mut self, node: Node) {
        self.unlink(&node.key);

        for dep in &node.dependencies {
            self.dependents
                .entry(dep.key.clone())
                .or_default()
                .insert(node.key.clone());
        }
        if let Some(parent) = &node.derived_from {
            let children = self.derived.entry(parent.clone()).or_default();
            if !children.contains(&node.key) {
                children.push(node.key.clone());
            }
        }
        self.nodes.insert(node.key.clone(), node);
    }

    /// Remove a node and its outgoing edges. Incoming dependency edges
    /// (other nodes depending on this key) are left in place — their
    /// owners still declare them.
    pub fn remove(&mut self, key: &str) -> Option<Node> {
        self.unlink(key);
        self.nodes.remove(key)
    }

    fn unlink(&mut self, key: &str) {
        if let Some(old) = self.nodes.get(key) {
            let deps: Vec<String> = old.dependencies.iter().map(|d| d.key.clone()).collect();
            let parent = old.derived_from.clone();
            for dep in deps {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(key);
                    if set.is_empty() {
                        self.dependents.remove(&dep);
                    }
                }
            }
            if let Some(parent) = parent
                && let Some(children) = self.derived.get_mut(&parent)
            {
                children.retain(|c| c != key);
                if children.is_empty() {
                    self.derived.remove(&parent);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// A dependency on `key` is satisfied iff its node is realized.
    pub fn is_realized(&self, key: &str) -> bool {
        matches!(
            self.nodes.get(key).map(|n| &n.state),
            Some(NodeState::Realized)
        )
    }

    pub fn set_state(&mut self, key: &str, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.state = state;
        }
    }

    pub fn set_metadata(&mut self, key: &str, metadata: Option<Metadata>) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.metadata = metadata;
        }
    }

    /// Forget the applied-state bookkeeping for a key whose dataplane
    /// object is known to be gone; the next apply is a create again.
    pub fn clear_applied(&mut self, key: &str) {
        if let Some(node) = self.nodes.get_mut(key) {
            node.metadata = None;
            node.last_applied = None;
        }
    }

    /// Derived children of a parent, in derivation order.
    pub fn derived_children(&self, parent: &str) -> Vec<String> {
        self.derived.get(parent).cloned().unwrap_or_default()
    }

    /// All derived descendants of a parent, deepest first — the order
    /// in which a cascade delete must run.
    pub fn derived_descendants_deepest_first(&self, parent: &str) -> Vec<String> {
        let mut ordered = Vec::new();
        let mut stack = self.derived_children(parent);
        while let Some(key) = stack.pop() {
            stack.extend(self.derived_children(&key));
            ordered.push(key);
        }
        ordered.reverse();
        ordered
    }

    /// Keys whose nodes currently declare a dependency on `key`.
    pub fn dependents_of(&self, key: &str) -> Vec<String> {
        self.dependents
            .get(key)
            .map(|set| {
                let mut keys: Vec<_> = set.iter().cloned().collect();
                keys.sort();
                keys
            })
            .unwrap_or_default()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// All nodes with the given origin, sorted by key.
    pub fn nodes_with_origin(&self, origin: Origin) -> Vec<&Node> {
        self.nodes.values().filter(|n| n.origin == origin).collect()
    }

    pub fn status(&self, key: &str) -> Option<ValueStatus> {
        self.nodes.get(key).map(node_status)
    }

    pub fn dump_status(&self) -> Vec<ValueStatus> {
        self.nodes.values().map(node_status).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn node_status(node: &Node) -> ValueStatus {
    ValueStatus {
        key: node.key.clone(),
        descriptor: node.descriptor.clone(),
        origin: node.origin,
        state: node.state.clone(),
        derived_from: node.derived_from.clone(),
        metadata: node.metadata.clone(),
    }
}

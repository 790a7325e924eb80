//! Transaction model and operation ordering.
//!
//! A transaction is an unordered set of per-key changes. Before
//! execution the scheduler orders it: deletes first in reverse
//! dependency order (dependents before their dependencies), then
//! creates/updates in forward order (dependencies first). Ordering uses
//! Kahn's algorithm; any dependency cycle rejects the whole batch.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::Dependency;
use crate::error::{KvsError, KvsResult};
use crate::graph::GraphStore;
use crate::registry::Registry;

/// One desired-state change: bind a new value to a key, or delete the
/// key (`new_value == None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvChange {
    pub key: String,
    pub new_value: Option<Value>,
}

impl KvChange {
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        Self { key: key.into(), new_value: Some(value) }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self { key: key.into(), new_value: None }
    }

    pub fn is_delete(&self) -> bool {
        self.new_value.is_none()
    }
}

/// What produced a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnKind {
    /// Incremental desired-state change from the northbound source.
    Change,
    /// Full resynchronization against a dataplane dump.
    FullResync,
    /// Replay of parked operations triggered by an external
    /// notification.
    NotificationReplay,
}

/// Terminal outcome of one executed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum OpOutcome {
    Created,
    Updated,
    /// Applied as delete-then-create per `update_with_recreate`.
    Recreated,
    Deleted,
    /// Old and new values compare equal; no descriptor call made.
    Noop,
    /// Parked on an unmet dependency; replays automatically.
    Deferred { blocked_on: String },
    Failed { error: String, retriable: bool },
    /// Validation rejected the value; never retried.
    Rejected { reason: String },
    /// The transaction was cancelled before this operation ran.
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpRecord {
    pub key: String,
    #[serde(flatten)]
    pub outcome: OpOutcome,
}

/// Per-key outcomes of one committed transaction, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TxnResult {
    pub kind: Option<TxnKind>,
    pub records: Vec<OpRecord>,
}

impl TxnResult {
    pub fn record(&mut self, key: impl Into<String>, outcome: OpOutcome) {
        self.records.push(OpRecord { key: key.into(), outcome });
    }

    /// Last recorded outcome for a key, if any.
    pub fn outcome_for(&self, key: &str) -> Option<&OpOutcome> {
        self.records
            .iter()
            .rev()
            .find(|r| r.key == key)
            .map(|r| &r.outcome)
    }

    pub fn failed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    OpOutcome::Failed { .. } | OpOutcome::Rejected { .. }
                )
            })
            .count()
    }
}

/// One operation as executed by the scheduler worker. Derived values
/// carry their parent key, which adds an implicit dependency.
#[derive(Debug, Clone)]
pub(crate) struct PlannedOp {
    pub key: String,
    pub new_value: Option<Value>,
    pub derived_from: Option<String>,
}

impl PlannedOp {
    pub fn from_change(change: KvChange) -> Self {
        Self { key: change.key, new_value: change.new_value, derived_from: None }
    }

    pub fn is_delete(&self) -> bool {
        self.new_value.is_none()
    }
}

/// Dependencies considered for ordering an op, including the implicit
/// parent edge of derived values.
fn op_dependencies(registry: &Registry, op: &PlannedOp) -> Vec<Dependency> {
    let mut deps = Vec::new();
    if let Some(parent) = &op.derived_from {
        deps.push(Dependency::new("derived-from", parent.clone()));
    }
    if let (Some(value), Some(descriptor)) =
        (&op.new_value, registry.descriptor_for_key(&op.key))
    {
        deps.extend(descriptor.dependencies(&op.key, value));
    }
    deps
}

/// Order a batch for execution. Returns deletes (reverse dependency
/// order) followed by creates/updates (forward order), or a
/// `DependencyCycle` error naming the keys involved.
pub(crate) fn order_ops(
    registry: &Registry,
    graph: &GraphStore,
    ops: Vec<PlannedOp>,
) -> KvsResult<Vec<PlannedOp>> {
    let (deletes, puts): (Vec<_>, Vec<_>) = ops.into_iter().partition(PlannedOp::is_delete);

    // Forward edges between puts in the batch: dependency before
    // dependent. Dependencies outside the batch are checked at
    // execution time instead.
    let put_keys: HashSet<&str> = puts.iter().map(|op| op.key.as_str()).collect();
    let mut put_edges = Vec::new();
    for op in &puts {
        for dep in op_dependencies(registry, op) {
            if put_keys.contains(dep.key.as_str()) && dep.key != op.key {
                put_edges.push((dep.key.clone(), op.key.clone()));
            }
        }
    }
    let ordered_put_keys = topo_order(
        puts.iter().map(|op| op.key.clone()).collect(),
        &put_edges,
    )
    .map_err(KvsError::DependencyCycle)?;

    // Delete edges come from the graph as currently realized: a
    // dependent (or derived child) must be deleted before the key it
    // hangs off.
    let delete_keys: HashSet<&str> = deletes.iter().map(|op| op.key.as_str()).collect();
    let mut delete_edges = Vec::new();
    for op in &deletes {
        for dependent in graph.dependents_of(&op.key) {
            if delete_keys.contains(dependent.as_str()) {
                delete_edges.push((dependent, op.key.clone()));
            }
        }
        for child in graph.derived_children(&op.key) {
            if delete_keys.contains(child.as_str()) {
                delete_edges.push((child, op.key.clone()));
            }
        }
    }
    let ordered_delete_keys = topo_order(
        deletes.iter().map(|op| op.key.clone()).collect(),
        &delete_edges,
    )
    .map_err(KvsError::DependencyCycle)?;

    let mut by_key: HashMap<String, PlannedOp> = deletes
        .into_iter()
        .chain(puts)
        .map(|op| (op.key.clone(), op))
        .collect();

    let mut ordered = Vec::with_capacity(by_key.len());
    for key in ordered_delete_keys.into_iter().chain(ordered_put_keys) {
        if let Some(op) = by_key.remove(&key) {
            ordered.push(op);
        }
    }
    Ok(ordered)
}

/// Kahn's algorithm with deterministic (lexicographic) tie-breaking.
/// Returns the keys left in the cycle on failure.
fn topo_order(keys: Vec<String>, edges: &[(String, String)]) -> Result<Vec<String>, Vec<String>> {
    let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();
    let mut indegree: HashMap<&str, usize> = keys.iter().map(|k| (k.as_str(), 0)).collect();
    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();

    let mut seen_edges = HashSet::new();
    for (from, to) in edges {
        if !key_set.contains(from.as_str()) || !key_set.contains(to.as_str()) {
            continue;
        }
        if !seen_edges.insert((from.as_str(), to.as_str())) {
            continue;
        }
        outgoing.entry(from.as_str()).or_default().push(to.as_str());
        *indegree.get_mut(to.as_str()).expect("key present") += 1;
    }

    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(k, _)| *k)
        .collect();
    ready.sort_unstable();
    let mut ready: VecDeque<&str> = ready.into();

    let mut ordered = Vec::with_capacity(keys.len());
    while let Some(key) = ready.pop_front() {
        ordered.push(key.to_string());
        let mut unblocked = Vec::new();
        if let Some(next) = outgoing.get(key) {
            for to in next {
                let deg = indegree.get_mut(to).expect("key present");
                *deg -= 1;
                if *deg == 0 {
                    unblocked.push(*to);
                }
            }
        }
        unblocked.sort_unstable();
        for key in unblocked {
            ready.push_back(key);
        }
    }

    if ordered.len() == keys.len() {
        Ok(ordered)
    } else {
        let mut cycle: Vec<String> = indegree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(k, _)| k.to_string())
            .collect();
        cycle.sort_unstable();
        Err(cycle)
    }
}

//! Dependency resolver — the cache of deferred operations.
//!
//! An operation whose dependencies are not all realized is parked here,
//! indexed by the *first* unmet dependency key. That is a deliberate
//! simplification: a replayed operation may immediately park again on a
//! second unmet dependency, at the cost of one wasted evaluation.
//! Descriptors must never keep pending-operation caches of their own;
//! this is the only one.

use std::collections::HashMap;

use crate::descriptor::Dependency;
use crate::graph::GraphStore;
use crate::txn::PlannedOp;

#[derive(Debug, Default)]
pub(crate) struct DependencyResolver {
    /// Unmet dependency key → operations waiting on it.
    parked: HashMap<String, Vec<PlannedOp>>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// First dependency in declaration order whose key is not realized.
    pub fn first_unmet<'a>(
        graph: &GraphStore,
        deps: &'a [Dependency],
    ) -> Option<&'a Dependency> {
        deps.iter().find(|dep| !graph.is_realized(&dep.key))
    }

    /// Park an operation until `blocked_on` is realized. Any older
    /// parked operation for the same key is superseded.
    pub fn park(&mut self, blocked_on: impl Into<String>, op: PlannedOp) {
        self.withdraw(&op.key);
        self.parked.entry(blocked_on.into()).or_default().push(op);
    }

    /// Drain every operation parked on a key that just became realized.
    pub fn drain_for(&mut self, realized_key: &str) -> Vec<PlannedOp> {
        self.parked.remove(realized_key).unwrap_or_default()
    }

    /// Drop any parked operation for a key withdrawn from desired
    /// state (or about to be replaced).
    pub fn withdraw(&mut self, key: &str) {
        self.parked.retain(|_, ops| {
            ops.retain(|op| op.key != key);
            !ops.is_empty()
        });
    }

    pub fn parked_count(&self) -> usize {
        self.parked.values().map(Vec::len).sum()
    }
}

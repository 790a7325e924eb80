//! KvScheduler — the engine front-end and its single worker task.
//!
//! All batches (incremental changes, resyncs, notification replays)
//! flow through one serialized transaction queue: the downstream
//! dataplane RPC channel is a single request/response stream and
//! ordering correctness depends on strict sequencing. Reads of the
//! graph and metadata index are lock-protected and may proceed
//! concurrently with execution, always observing operation-boundary
//! snapshots.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gridplane_core::Origin;

use crate::descriptor::{Dependency, Descriptor, Metadata};
use crate::error::{KvsError, KvsResult};
use crate::graph::{GraphStore, Node, NodeState, ValueStatus};
use crate::metadata::{MetadataBroker, MetadataMap};
use crate::notify::{ExternalNotification, NotificationKind, NotificationSender};
use crate::registry::Registry;
use crate::resolver::DependencyResolver;
use crate::resync;
use crate::txn::{KvChange, OpOutcome, PlannedOp, TxnKind, TxnResult, order_ops};

const COMMAND_QUEUE_DEPTH: usize = 64;
const NOTIFICATION_QUEUE_DEPTH: usize = 256;

/// State shared between the scheduler handle and its worker task.
pub(crate) struct EngineShared {
    pub registry: Registry,
    pub graph: RwLock<GraphStore>,
    pub metadata: MetadataBroker,
}

enum EngineCommand {
    Commit {
        changes: Vec<KvChange>,
        cancel: Option<watch::Receiver<bool>>,
        reply: oneshot::Sender<KvsResult<TxnResult>>,
    },
    Resync {
        reply: oneshot::Sender<KvsResult<TxnResult>>,
    },
}

/// The reconciliation engine handle.
///
/// Built from an immutable `Registry`; descriptor registration happens
/// strictly before the scheduler starts.
pub struct KvScheduler {
    shared: Arc<EngineShared>,
    cmd_tx: mpsc::Sender<EngineCommand>,
    notify_tx: mpsc::Sender<ExternalNotification>,
    worker: JoinHandle<()>,
}

impl KvScheduler {
    /// Start the engine worker with the given descriptor registry.
    pub fn start(registry: Registry) -> Self {
        let shared = Arc::new(EngineShared {
            registry,
            graph: RwLock::new(GraphStore::new()),
            metadata: MetadataBroker::new(),
        });
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);

        let worker_shared = shared.clone();
        let worker = tokio::spawn(async move {
            run_worker(worker_shared, cmd_rx, notify_rx).await;
        });

        info!("kv scheduler started");
        Self { shared, cmd_tx, notify_tx, worker }
    }

    /// Commit a batch of desired-state changes and wait for its result.
    pub async fn commit(&self, changes: Vec<KvChange>) -> KvsResult<TxnResult> {
        self.commit_inner(changes, None).await
    }

    /// Commit with a cancellation signal. Cancellation takes effect
    /// between operations; already-applied operations stay in place.
    pub async fn commit_with_cancel(
        &self,
        changes: Vec<KvChange>,
        cancel: watch::Receiver<bool>,
    ) -> KvsResult<TxnResult> {
        self.commit_inner(changes, Some(cancel)).await
    }

    async fn commit_inner(
        &self,
        changes: Vec<KvChange>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> KvsResult<TxnResult> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Commit { changes, cancel, reply })
            .await
            .map_err(|_| KvsError::QueueClosed)?;
        rx.await.map_err(|_| KvsError::QueueClosed)?
    }

    /// Run a full resynchronization pass and wait for its result.
    pub async fn resync(&self) -> KvsResult<TxnResult> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Resync { reply })
            .await
            .map_err(|_| KvsError::QueueClosed)?;
        rx.await.map_err(|_| KvsError::QueueClosed)?
    }

    /// Handle for injecting external dataplane notifications.
    pub fn notifier(&self) -> NotificationSender {
        NotificationSender::new(self.notify_tx.clone())
    }

    /// Status of one key, if known.
    pub fn value_status(&self, key: &str) -> Option<ValueStatus> {
        let graph = self.shared.graph.read().expect("graph lock poisoned");
        graph.status(key)
    }

    /// Status of every known key, sorted by key.
    pub fn dump_status(&self) -> Vec<ValueStatus> {
        let graph = self.shared.graph.read().expect("graph lock poisoned");
        graph.dump_status()
    }

    /// The metadata map of a descriptor (created if absent). Intended
    /// for descriptors resolving cross-type references.
    pub fn metadata_map(&self, descriptor: &str) -> Arc<MetadataMap> {
        self.shared.metadata.map_for(descriptor)
    }

    /// Stop the worker after the queue drains.
    pub async fn shutdown(self) {
        drop(self.cmd_tx);
        drop(self.notify_tx);
        if let Err(err) = self.worker.await {
            error!(error = %err, "engine worker task panicked");
        }
        info!("kv scheduler stopped");
    }
}

// ── Worker loop ─────────────────────────────────────────────────────

async fn run_worker(
    shared: Arc<EngineShared>,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    mut notify_rx: mpsc::Receiver<ExternalNotification>,
) {
    let mut resolver = DependencyResolver::new();
    let mut notify_open = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(EngineCommand::Commit { changes, cancel, reply }) => {
                    let ops = changes.into_iter().map(PlannedOp::from_change).collect();
                    let result =
                        execute_txn(&shared, &mut resolver, TxnKind::Change, ops, cancel).await;
                    let _ = reply.send(result);
                }
                Some(EngineCommand::Resync { reply }) => {
                    let result = run_resync(&shared, &mut resolver).await;
                    let _ = reply.send(result);
                }
                None => break,
            },
            note = notify_rx.recv(), if notify_open => match note {
                Some(notification) => {
                    handle_notification(&shared, &mut resolver, notification).await;
                }
                None => notify_open = false,
            },
        }
    }
    debug!("engine worker exiting");
}

async fn run_resync(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
) -> KvsResult<TxnResult> {
    info!("full resync started");
    // Stale name → handle mappings must not leak across resyncs.
    shared.metadata.clear_all();

    let ops = resync::build_resync_ops(shared).await;
    let result = execute_txn(shared, resolver, TxnKind::FullResync, ops, None).await?;
    info!(
        ops = result.records.len(),
        failed = result.failed_count(),
        "full resync done"
    );
    Ok(result)
}

async fn handle_notification(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
    notification: ExternalNotification,
) {
    let key = notification.key;
    match notification.kind {
        NotificationKind::Appeared => {
            info!(%key, "external notification: key appeared");
            {
                let mut graph = shared.graph.write().expect("graph lock poisoned");
                if graph.contains(&key) {
                    graph.set_state(&key, NodeState::Realized);
                } else {
                    let descriptor = shared
                        .registry
                        .descriptor_for_key(&key)
                        .map(|d| d.name().to_string())
                        .unwrap_or_default();
                    let value = notification.value.unwrap_or(Value::Null);
                    graph.upsert(Node {
                        key: key.clone(),
                        descriptor,
                        value: value.clone(),
                        origin: Origin::Southbound,
                        state: NodeState::Realized,
                        metadata: None,
                        last_applied: Some(value),
                        derived_from: None,
                        dependencies: Vec::new(),
                    });
                }
            }

            let drained = resolver.drain_for(&key);
            if drained.is_empty() {
                return;
            }
            debug!(%key, ops = drained.len(), "replaying operations parked on key");
            match execute_txn(shared, resolver, TxnKind::NotificationReplay, drained, None).await
            {
                Ok(result) => {
                    debug!(%key, ops = result.records.len(), "notification replay done");
                }
                Err(err) => error!(%key, error = %err, "notification replay failed"),
            }
        }
        NotificationKind::Disappeared => {
            info!(%key, "external notification: key disappeared");
            let mut graph = shared.graph.write().expect("graph lock poisoned");
            demote_dependents(&mut graph, resolver, &key);
            match graph.get(&key).map(|n| n.origin) {
                Some(Origin::Southbound) => {
                    graph.remove(&key);
                }
                Some(Origin::Northbound) => {
                    // Still desired; the next resync re-creates it. The
                    // stored handle is dead with the object.
                    graph.clear_applied(&key);
                    graph.set_state(
                        &key,
                        NodeState::Failed {
                            error: "vanished from dataplane".to_string(),
                            retriable: true,
                        },
                    );
                }
                None => {}
            }
        }
    }
}

/// Push still-desired values depending on a vanished key back to
/// pending, parked for replay should the key return.
fn demote_dependents(graph: &mut GraphStore, resolver: &mut DependencyResolver, gone_key: &str) {
    for dep_key in graph.dependents_of(gone_key) {
        let Some(node) = graph.get(&dep_key) else { continue };
        if node.origin != Origin::Northbound || !matches!(node.state, NodeState::Realized) {
            continue;
        }
        let op = PlannedOp {
            key: dep_key.clone(),
            new_value: Some(node.value.clone()),
            derived_from: node.derived_from.clone(),
        };
        graph.set_state(
            &dep_key,
            NodeState::Pending { blocked_on: gone_key.to_string() },
        );
        resolver.park(gone_key, op);
        warn!(key = %dep_key, gone = %gone_key, "dependency removed, value demoted to pending");
    }
}

// ── Transaction execution ───────────────────────────────────────────

pub(crate) async fn execute_txn(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
    kind: TxnKind,
    ops: Vec<PlannedOp>,
    cancel: Option<watch::Receiver<bool>>,
) -> KvsResult<TxnResult> {
    let ordered = {
        let graph = shared.graph.read().expect("graph lock poisoned");
        order_ops(&shared.registry, &graph, ops)?
    };

    let mut result = TxnResult { kind: Some(kind), records: Vec::new() };
    let mut queue: VecDeque<PlannedOp> = ordered.into();

    while let Some(op) = queue.pop_front() {
        if let Some(cancel) = &cancel
            && *cancel.borrow()
        {
            warn!(key = %op.key, "transaction cancelled, skipping remaining operations");
            result.record(op.key, OpOutcome::Cancelled);
            for rest in queue.drain(..) {
                result.record(rest.key, OpOutcome::Cancelled);
            }
            break;
        }

        if op.is_delete() {
            apply_delete(shared, resolver, op, &mut result).await;
        } else {
            apply_put(shared, resolver, op, &mut queue, &mut result).await;
        }
    }

    Ok(result)
}

async fn apply_delete(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
    op: PlannedOp,
    result: &mut TxnResult,
) {
    resolver.withdraw(&op.key);
    let exists = {
        let graph = shared.graph.read().expect("graph lock poisoned");
        graph.contains(&op.key)
    };
    if !exists {
        result.record(op.key, OpOutcome::Noop);
        return;
    }
    cascade_delete(shared, resolver, &op.key, result, true).await;
}

/// Delete all derived descendants of `key` (deepest first), then `key`
/// itself. Returns whether the final delete succeeded.
async fn cascade_delete(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
    key: &str,
    result: &mut TxnResult,
    record_own: bool,
) -> bool {
    let descendants = {
        let graph = shared.graph.read().expect("graph lock poisoned");
        graph.derived_descendants_deepest_first(key)
    };
    for child in descendants {
        delete_one(shared, resolver, &child, result, true).await;
    }
    delete_one(shared, resolver, key, result, record_own).await
}

async fn delete_one(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
    key: &str,
    result: &mut TxnResult,
    record: bool,
) -> bool {
    let Some(node) = ({
        let graph = shared.graph.read().expect("graph lock poisoned");
        graph.get(key).cloned()
    }) else {
        return true;
    };
    resolver.withdraw(key);

    // Only objects that made it to the dataplane need a descriptor
    // call; pending or create-failed nodes are dropped from the graph
    // directly.
    let realized = matches!(node.state, NodeState::Realized | NodeState::Retrieved);
    if (realized || node.last_applied.is_some() || node.metadata.is_some())
        && !node.descriptor.is_empty()
        && let Ok(descriptor) = shared.registry.get(&node.descriptor)
    {
        // Delete against what the dataplane actually holds, which may
        // differ from the desired value after a failed update.
        let applied = node.last_applied.as_ref().unwrap_or(&node.value);
        if let Err(err) = descriptor.delete(key, applied, node.metadata.as_ref()).await {
            let retriable = descriptor.is_retriable_failure(&err);
            error!(%key, error = %err, retriable, "delete failed");
            let mut graph = shared.graph.write().expect("graph lock poisoned");
            graph.set_state(
                key,
                NodeState::Failed { error: err.to_string(), retriable },
            );
            if record {
                result.record(key, OpOutcome::Failed { error: err.to_string(), retriable });
            }
            return false;
        }
        shared
            .metadata
            .map_for(descriptor.name())
            .delete(&descriptor.key_label(key));
    }

    let mut graph = shared.graph.write().expect("graph lock poisoned");
    graph.remove(key);
    demote_dependents(&mut graph, resolver, key);
    drop(graph);

    debug!(%key, "value deleted");
    if record {
        result.record(key, OpOutcome::Deleted);
    }
    true
}

async fn apply_put(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
    op: PlannedOp,
    queue: &mut VecDeque<PlannedOp>,
    result: &mut TxnResult,
) {
    let key = op.key.clone();
    let new_value = op.new_value.clone().expect("put carries a value");

    let Some(descriptor) = shared.registry.descriptor_for_key(&key) else {
        if let Some(parent) = &op.derived_from {
            // Property value: no descriptor realizes it, it simply
            // exists as a dependency target for other values.
            apply_property(shared, resolver, &key, new_value, parent, queue, result);
            return;
        }
        warn!(%key, "no descriptor recognizes key");
        result.record(
            key,
            OpOutcome::Rejected { reason: "no descriptor recognizes key".to_string() },
        );
        return;
    };

    let old = {
        let graph = shared.graph.read().expect("graph lock poisoned");
        graph.get(&key).cloned()
    };
    // What the dataplane currently holds for this key, surviving
    // deferral and failed attempts since the last successful apply.
    let applied = old.as_ref().and_then(|node| match &node.state {
        NodeState::Realized | NodeState::Retrieved => Some(node.value.clone()),
        _ => node.last_applied.clone(),
    });
    let old_metadata = old.as_ref().and_then(|node| node.metadata.clone());

    // Validation comes before any dependency analysis.
    if let Err(err) = descriptor.validate(&key, &new_value) {
        error!(%key, error = %err, "validation failed");
        let mut graph = shared.graph.write().expect("graph lock poisoned");
        graph.upsert(Node {
            key: key.clone(),
            descriptor: descriptor.name().to_string(),
            value: new_value,
            origin: Origin::Northbound,
            state: NodeState::Failed { error: err.to_string(), retriable: false },
            metadata: old_metadata,
            last_applied: applied,
            derived_from: op.derived_from.clone(),
            dependencies: Vec::new(),
        });
        drop(graph);
        result.record(key, OpOutcome::Rejected { reason: err.reason });
        return;
    }

    let mut deps = Vec::new();
    if let Some(parent) = &op.derived_from {
        deps.push(Dependency::new("derived-from", parent.clone()));
    }
    deps.extend(descriptor.dependencies(&key, &new_value));

    // Unmet dependency → park and move on; this is not an error. The
    // applied value and metadata ride along on the pending node, so a
    // replay of an already-realized key stays an update.
    let unmet = {
        let graph = shared.graph.read().expect("graph lock poisoned");
        DependencyResolver::first_unmet(&graph, &deps).cloned()
    };
    if let Some(dep) = unmet {
        debug!(%key, blocked_on = %dep.key, label = %dep.label, "operation deferred");
        let mut graph = shared.graph.write().expect("graph lock poisoned");
        graph.upsert(Node {
            key: key.clone(),
            descriptor: descriptor.name().to_string(),
            value: new_value.clone(),
            origin: Origin::Northbound,
            state: NodeState::Pending { blocked_on: dep.key.clone() },
            metadata: old_metadata,
            last_applied: applied,
            derived_from: op.derived_from.clone(),
            dependencies: deps,
        });
        drop(graph);
        resolver.park(dep.key.clone(), op);
        result.record(key, OpOutcome::Deferred { blocked_on: dep.key });
        return;
    }

    // Same value that failed non-retriably: do not hammer the
    // dataplane; only a changed value gets another attempt.
    if let Some(old_node) = &old
        && let NodeState::Failed { error, retriable: false } = &old_node.state
        && descriptor.value_comparator(&key, &old_node.value, &new_value)
    {
        result.record(
            key,
            OpOutcome::Failed { error: error.clone(), retriable: false },
        );
        return;
    }

    match applied {
        // The object already exists on the dataplane, whatever state
        // the node is in now: update (or recreate), never a second
        // create.
        Some(applied_value) => {
            // Equivalent value → no descriptor call, but derived values
            // and parked dependents are still refreshed.
            if descriptor.value_comparator(&key, &applied_value, &new_value) {
                finish_success(
                    shared,
                    resolver,
                    &descriptor,
                    &op,
                    new_value,
                    old_metadata,
                    deps,
                    OpOutcome::Noop,
                    queue,
                    result,
                );
                return;
            }

            if descriptor.update_with_recreate(
                &key,
                &applied_value,
                &new_value,
                old_metadata.as_ref(),
            ) {
                // Old instance (and its derived values) must go first.
                if !cascade_delete(shared, resolver, &key, result, false).await {
                    return;
                }
                match descriptor.create(&key, &new_value).await {
                    Ok(metadata) => finish_success(
                        shared,
                        resolver,
                        &descriptor,
                        &op,
                        new_value,
                        metadata,
                        deps,
                        OpOutcome::Recreated,
                        queue,
                        result,
                    ),
                    Err(err) => {
                        // The old instance was already deleted; nothing
                        // applied is left behind.
                        fail_op(
                            shared, &descriptor, &key, &op, new_value, deps, None, None, err,
                            result,
                        );
                    }
                }
            } else {
                match descriptor
                    .update(&key, &applied_value, &new_value, old_metadata.as_ref())
                    .await
                {
                    Ok(metadata) => finish_success(
                        shared,
                        resolver,
                        &descriptor,
                        &op,
                        new_value,
                        metadata,
                        deps,
                        OpOutcome::Updated,
                        queue,
                        result,
                    ),
                    Err(err) => {
                        // The object still exists under its old value
                        // and handle; keep both so a later delete or
                        // retry reaches it.
                        fail_op(
                            shared,
                            &descriptor,
                            &key,
                            &op,
                            new_value,
                            deps,
                            Some(applied_value),
                            old_metadata,
                            err,
                            result,
                        );
                    }
                }
            }
        }
        None => match descriptor.create(&key, &new_value).await {
            Ok(metadata) => finish_success(
                shared,
                resolver,
                &descriptor,
                &op,
                new_value,
                metadata,
                deps,
                OpOutcome::Created,
                queue,
                result,
            ),
            Err(err) => {
                fail_op(shared, &descriptor, &key, &op, new_value, deps, None, None, err, result);
            }
        },
    }
}

fn apply_property(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
    key: &str,
    value: Value,
    parent: &str,
    queue: &mut VecDeque<PlannedOp>,
    result: &mut TxnResult,
) {
    let mut graph = shared.graph.write().expect("graph lock poisoned");
    let existed = graph.contains(key);
    graph.upsert(Node {
        key: key.to_string(),
        descriptor: String::new(),
        value,
        origin: Origin::Northbound,
        state: NodeState::Realized,
        metadata: None,
        last_applied: None,
        derived_from: Some(parent.to_string()),
        dependencies: vec![Dependency::new("derived-from", parent.to_string())],
    });
    drop(graph);

    for parked in resolver.drain_for(key) {
        debug!(key = %parked.key, realized = %key, "replaying parked operation");
        queue.push_back(parked);
    }
    result.record(
        key,
        if existed { OpOutcome::Noop } else { OpOutcome::Created },
    );
}

#[allow(clippy::too_many_arguments)]
fn fail_op(
    shared: &Arc<EngineShared>,
    descriptor: &Arc<dyn Descriptor>,
    key: &str,
    op: &PlannedOp,
    new_value: Value,
    deps: Vec<Dependency>,
    last_applied: Option<Value>,
    metadata: Option<Metadata>,
    err: anyhow::Error,
    result: &mut TxnResult,
) {
    let retriable = descriptor.is_retriable_failure(&err);
    error!(%key, error = %err, retriable, "operation failed");
    let mut graph = shared.graph.write().expect("graph lock poisoned");
    graph.upsert(Node {
        key: key.to_string(),
        descriptor: descriptor.name().to_string(),
        value: new_value,
        origin: Origin::Northbound,
        state: NodeState::Failed { error: err.to_string(), retriable },
        metadata,
        last_applied,
        derived_from: op.derived_from.clone(),
        dependencies: deps,
    });
    drop(graph);
    result.record(
        key.to_string(),
        OpOutcome::Failed { error: err.to_string(), retriable },
    );
}

/// Record a successful apply: store metadata, mark the node realized,
/// reconcile derived values, and replay anything parked on this key.
#[allow(clippy::too_many_arguments)]
fn finish_success(
    shared: &Arc<EngineShared>,
    resolver: &mut DependencyResolver,
    descriptor: &Arc<dyn Descriptor>,
    op: &PlannedOp,
    new_value: Value,
    metadata: Option<Metadata>,
    deps: Vec<Dependency>,
    outcome: OpOutcome,
    queue: &mut VecDeque<PlannedOp>,
    result: &mut TxnResult,
) {
    let key = &op.key;
    let map = shared.metadata.map_for(descriptor.name());
    let label = descriptor.key_label(key);
    match &metadata {
        Some(metadata) => map.put(label, metadata.clone()),
        None => {
            map.delete(&label);
        }
    }

    let old_children = {
        let mut graph = shared.graph.write().expect("graph lock poisoned");
        graph.upsert(Node {
            key: key.clone(),
            descriptor: descriptor.name().to_string(),
            value: new_value.clone(),
            origin: Origin::Northbound,
            state: NodeState::Realized,
            metadata,
            last_applied: Some(new_value.clone()),
            derived_from: op.derived_from.clone(),
            dependencies: deps,
        });
        graph.derived_children(key)
    };

    // Derived set difference: removed children are scheduled for
    // deletion, added/changed ones for apply; unchanged ones become
    // no-ops via the comparator.
    let new_derived = descriptor.derived_values(key, &new_value);
    let new_keys: HashSet<&str> = new_derived.iter().map(|kv| kv.key.as_str()).collect();
    for obsolete in old_children
        .into_iter()
        .filter(|child| !new_keys.contains(child.as_str()))
    {
        queue.push_back(PlannedOp {
            key: obsolete,
            new_value: None,
            derived_from: Some(key.clone()),
        });
    }
    for kv in new_derived {
        queue.push_back(PlannedOp {
            key: kv.key,
            new_value: Some(kv.value),
            derived_from: Some(key.clone()),
        });
    }

    for parked in resolver.drain_for(key) {
        debug!(key = %parked.key, realized = %key, "replaying parked operation");
        queue.push_back(parked);
    }

    match &outcome {
        OpOutcome::Noop => debug!(%key, "value unchanged"),
        outcome => debug!(%key, ?outcome, "value applied"),
    }
    result.record(key.clone(), outcome);
}

//! Resync coordinator — dump, merge, diff.
//!
//! A full resync retrieves every descriptor's view of actual dataplane
//! state, merges it into the graph (tagged southbound), diffs it
//! against desired state with each descriptor's value comparator, and
//! hands the resulting operation set to the normal transaction
//! executor. This is the only path that deletes objects existing in
//! the dataplane without a desired counterpart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use gridplane_core::{KvPair, Origin, RetrievedKv};

use crate::engine::EngineShared;
use crate::graph::{Node, NodeState};
use crate::txn::PlannedOp;

/// Build the corrective operation set for a full resync. The metadata
/// index has already been cleared; rediscovered metadata is seeded here
/// from the dump.
pub(crate) async fn build_resync_ops(shared: &Arc<EngineShared>) -> Vec<PlannedOp> {
    // Desired top-level values; derived ones are re-expanded during
    // execution of their parents.
    let desired: Vec<Node> = {
        let graph = shared.graph.read().expect("graph lock poisoned");
        graph
            .nodes_with_origin(Origin::Northbound)
            .into_iter()
            .filter(|n| n.derived_from.is_none())
            .cloned()
            .collect()
    };

    // ── Retrieve actual state per descriptor ───────────────────────
    let mut dumped: HashMap<String, RetrievedKv> = HashMap::new();
    let mut failed_retrieve: HashSet<String> = HashSet::new();

    for descriptor in shared.registry.all() {
        if !descriptor.retrieve_supported() {
            continue;
        }
        let correlate: Vec<KvPair> = desired
            .iter()
            .filter(|n| descriptor.owns_key(&n.key))
            .map(|n| KvPair::new(n.key.clone(), n.value.clone()))
            .collect();

        match descriptor.retrieve(&correlate).await {
            Ok(kvs) => {
                debug!(
                    descriptor = %descriptor.name(),
                    objects = kvs.len(),
                    "retrieved actual state"
                );
                let map = shared.metadata.map_for(descriptor.name());
                for kv in kvs {
                    if let Some(metadata) = &kv.metadata {
                        map.put(descriptor.key_label(&kv.key), metadata.clone());
                    }
                    dumped.insert(kv.key.clone(), kv);
                }
            }
            Err(err) => {
                // Without a dump we cannot tell created from missing;
                // leave this descriptor's keys untouched this pass.
                warn!(
                    descriptor = %descriptor.name(),
                    error = %err,
                    "retrieve failed, skipping descriptor in this resync"
                );
                failed_retrieve.insert(descriptor.name().to_string());
            }
        }
    }

    // ── Merge + diff ───────────────────────────────────────────────
    let mut ops = Vec::new();
    let mut graph = shared.graph.write().expect("graph lock poisoned");

    // Southbound leftovers from earlier resyncs that the new dump no
    // longer reports are gone from the dataplane.
    let stale_sb: Vec<String> = graph
        .nodes_with_origin(Origin::Southbound)
        .into_iter()
        .filter(|n| !dumped.contains_key(&n.key) && !failed_retrieve.contains(&n.descriptor))
        .map(|n| n.key.clone())
        .collect();
    for key in stale_sb {
        graph.remove(&key);
    }

    for node in desired {
        if failed_retrieve.contains(&node.descriptor) {
            continue;
        }
        let Some(descriptor) = shared.registry.descriptor_for_key(&node.key) else {
            continue;
        };

        if let Some(dump) = dumped.remove(&node.key) {
            let equivalent = descriptor.value_comparator(&node.key, &dump.value, &node.value);
            // The dumped object is the authoritative "old" state for
            // the executor: equal values short-circuit to a no-op,
            // differing ones go through update with the rediscovered
            // metadata.
            let value = if equivalent { node.value.clone() } else { dump.value };
            graph.upsert(Node {
                key: node.key.clone(),
                descriptor: node.descriptor.clone(),
                value: value.clone(),
                origin: Origin::Northbound,
                state: NodeState::Realized,
                metadata: dump.metadata,
                last_applied: Some(value),
                derived_from: None,
                dependencies: node.dependencies.clone(),
            });
        } else if descriptor.retrieve_supported() && graph.is_realized(&node.key) {
            // Previously realized but missing from the dump: the
            // object vanished behind our back; re-create it. Metadata
            // and the applied value died with the object.
            graph.clear_applied(&node.key);
            graph.set_state(
                &node.key,
                NodeState::Failed {
                    error: "missing from dataplane dump".to_string(),
                    retriable: true,
                },
            );
        }

        ops.push(PlannedOp {
            key: node.key,
            new_value: Some(node.value),
            derived_from: None,
        });
    }

    // Dumped objects with no desired counterpart are obsolete and get
    // the only out-of-desired-state deletes the engine ever issues.
    for (key, dump) in dumped {
        if let Some(existing) = graph.get(&key)
            && existing.origin == Origin::Northbound
        {
            // Matches a derived desired value; its parent's expansion
            // reconciles it.
            graph.set_metadata(&key, dump.metadata);
            continue;
        }
        let Some(descriptor) = shared.registry.descriptor_for_key(&key) else {
            warn!(%key, "dumped key has no descriptor, ignoring");
            continue;
        };
        debug!(%key, "obsolete dataplane object scheduled for deletion");
        graph.upsert(Node {
            key: key.clone(),
            descriptor: descriptor.name().to_string(),
            value: dump.value.clone(),
            origin: Origin::Southbound,
            state: NodeState::Retrieved,
            metadata: dump.metadata,
            last_applied: Some(dump.value),
            derived_from: None,
            dependencies: Vec::new(),
        });
        ops.push(PlannedOp { key, new_value: None, derived_from: None });
    }

    ops
}

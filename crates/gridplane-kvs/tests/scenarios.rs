//! End-to-end scheduler scenarios.
//!
//! Drives the engine through recording mock descriptors: dependency
//! ordering, cache-and-replay, derived-value cascades, resync diffing,
//! partial-failure isolation, and cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use gridplane_core::{KvPair, Origin, RetrievedKv};
use gridplane_kvs::{
    Dependency, Descriptor, KvChange, KvScheduler, KvsError, Metadata, NodeState, OpOutcome,
    Registry, ValidationError,
};

/// Shared log of descriptor mutations, in call order.
#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    fn push(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn snapshot(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

/// Mock descriptor driven by conventions in the value payload:
///
/// - `"deps": ["key", ...]` — declared dependencies
/// - `"derived": [{"key": k, "value": v}, ...]` — derived values
/// - `"members": [...]` — list field compared as a set
/// - `"invalid": "reason"` — fails validation
/// - `"fail_create": "msg"` — create fails; retriable iff the message
///   contains "transient"
/// - `"fail_update": "msg"` — update fails, same retriability rule
/// - `"recreate": true` — updates go through delete-then-create
struct Mock {
    name: String,
    prefix: String,
    log: Arc<CallLog>,
    supports_retrieve: bool,
    dump: Mutex<Vec<RetrievedKv>>,
}

impl Mock {
    fn new(name: &str, prefix: &str, log: Arc<CallLog>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            log,
            supports_retrieve: false,
            dump: Mutex::new(Vec::new()),
        })
    }

    fn with_retrieve(name: &str, prefix: &str, log: Arc<CallLog>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            log,
            supports_retrieve: true,
            dump: Mutex::new(Vec::new()),
        })
    }

    fn set_dump(&self, kvs: Vec<(&str, Value, Option<Value>)>) {
        *self.dump.lock().unwrap() = kvs
            .into_iter()
            .map(|(key, value, metadata)| RetrievedKv {
                key: key.to_string(),
                value,
                metadata,
                origin: Origin::Southbound,
            })
            .collect();
    }
}

fn normalized(value: &Value) -> Value {
    let mut value = value.clone();
    if let Some(members) = value.get_mut("members").and_then(Value::as_array_mut) {
        members.sort_by_key(|m| m.to_string());
    }
    value
}

#[async_trait]
impl Descriptor for Mock {
    fn name(&self) -> &str {
        &self.name
    }

    fn owns_key(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    fn validate(&self, key: &str, value: &Value) -> Result<(), ValidationError> {
        match value.get("invalid").and_then(Value::as_str) {
            Some(reason) => Err(ValidationError::new(key, reason)),
            None => Ok(()),
        }
    }

    async fn create(&self, key: &str, value: &Value) -> anyhow::Result<Option<Metadata>> {
        if let Some(msg) = value.get("fail_create").and_then(Value::as_str) {
            anyhow::bail!("{msg}");
        }
        self.log.push(format!("create {key}"));
        Ok(Some(json!({ "handle": format!("h-{key}") })))
    }

    async fn update(
        &self,
        key: &str,
        _old: &Value,
        new: &Value,
        old_metadata: Option<&Metadata>,
    ) -> anyhow::Result<Option<Metadata>> {
        if let Some(msg) = new.get("fail_update").and_then(Value::as_str) {
            anyhow::bail!("{msg}");
        }
        self.log.push(format!("update {key}"));
        Ok(old_metadata.cloned())
    }

    fn update_with_recreate(
        &self,
        _key: &str,
        _old: &Value,
        new: &Value,
        _metadata: Option<&Metadata>,
    ) -> bool {
        new.get("recreate").and_then(Value::as_bool).unwrap_or(false)
    }

    async fn delete(
        &self,
        key: &str,
        _value: &Value,
        _metadata: Option<&Metadata>,
    ) -> anyhow::Result<()> {
        self.log.push(format!("delete {key}"));
        Ok(())
    }

    fn retrieve_supported(&self) -> bool {
        self.supports_retrieve
    }

    async fn retrieve(&self, _correlate: &[KvPair]) -> anyhow::Result<Vec<RetrievedKv>> {
        Ok(self.dump.lock().unwrap().clone())
    }

    fn dependencies(&self, _key: &str, value: &Value) -> Vec<Dependency> {
        value
            .get("deps")
            .and_then(Value::as_array)
            .map(|deps| {
                deps.iter()
                    .filter_map(Value::as_str)
                    .map(|dep| Dependency::new(dep, dep))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn derived_values(&self, _key: &str, value: &Value) -> Vec<KvPair> {
        value
            .get("derived")
            .and_then(Value::as_array)
            .map(|derived| {
                derived
                    .iter()
                    .map(|kv| KvPair::new(kv["key"].as_str().unwrap(), kv["value"].clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn value_comparator(&self, _key: &str, old: &Value, new: &Value) -> bool {
        normalized(old) == normalized(new)
    }

    fn is_retriable_failure(&self, err: &anyhow::Error) -> bool {
        err.to_string().contains("transient")
    }
}

struct Harness {
    scheduler: KvScheduler,
    log: Arc<CallLog>,
    /// Retrieve-capable descriptor, kept out for dump injection.
    nat: Arc<Mock>,
}

fn harness() -> Harness {
    let log = Arc::new(CallLog::default());
    let nat = Mock::with_retrieve("nat", "nat/", log.clone());

    let mut registry = Registry::new();
    registry.register(Mock::new("sa", "sa/", log.clone())).unwrap();
    registry.register(Mock::new("spd", "spd/", log.clone())).unwrap();
    registry
        .register(Mock::new("interface", "iface/", log.clone()))
        .unwrap();
    registry
        .register(Mock::new("spd-binding", "binding/", log.clone()))
        .unwrap();
    registry.register(nat.clone()).unwrap();

    Harness { scheduler: KvScheduler::start(registry), log, nat }
}

fn spd_with_bindings() -> Value {
    json!({
        "policies": 2,
        "derived": [
            { "key": "binding/spd/10/interface/eth0",
              "value": { "deps": ["iface/eth0"] } },
            { "key": "binding/spd/10/sa/5",
              "value": { "deps": ["sa/5"] } },
        ]
    })
}

#[tokio::test]
async fn batch_orders_dependency_before_dependent() {
    let h = harness();
    // Scenario 1: SPD-10 depends on SA-5; submitted in reverse order.
    let result = h
        .scheduler
        .commit(vec![
            KvChange::put("spd/10", json!({ "deps": ["sa/5"] })),
            KvChange::put("sa/5", json!({ "spi": 1005 })),
        ])
        .await
        .unwrap();

    assert_eq!(h.log.take(), ["create sa/5", "create spd/10"]);
    assert_eq!(result.outcome_for("sa/5"), Some(&OpOutcome::Created));
    assert_eq!(result.outcome_for("spd/10"), Some(&OpOutcome::Created));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn missing_dependency_defers_then_replays() {
    let h = harness();
    // Scenario 2: SPD-10 alone is parked, not failed.
    let result = h
        .scheduler
        .commit(vec![KvChange::put("spd/10", json!({ "deps": ["sa/5"] }))])
        .await
        .unwrap();
    assert_eq!(
        result.outcome_for("spd/10"),
        Some(&OpOutcome::Deferred { blocked_on: "sa/5".to_string() })
    );
    assert!(h.log.take().is_empty());

    let status = h.scheduler.value_status("spd/10").unwrap();
    assert_eq!(
        status.state,
        NodeState::Pending { blocked_on: "sa/5".to_string() }
    );

    // Realizing SA-5 replays SPD-10 without resubmission.
    h.scheduler
        .commit(vec![KvChange::put("sa/5", json!({ "spi": 1005 }))])
        .await
        .unwrap();
    assert_eq!(h.log.take(), ["create sa/5", "create spd/10"]);
    assert_eq!(
        h.scheduler.value_status("spd/10").unwrap().state,
        NodeState::Realized
    );
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn deferred_update_of_realized_value_replays_as_update() {
    let h = harness();
    h.scheduler
        .commit(vec![KvChange::put("sa/1", json!({ "spi": 1 }))])
        .await
        .unwrap();
    h.log.take();

    // New revision gains a dependency that is not realized yet: the
    // operation parks, but the object on the dataplane stays put.
    let result = h
        .scheduler
        .commit(vec![KvChange::put(
            "sa/1",
            json!({ "spi": 2, "deps": ["iface/eth0"] }),
        )])
        .await
        .unwrap();
    assert_eq!(
        result.outcome_for("sa/1"),
        Some(&OpOutcome::Deferred { blocked_on: "iface/eth0".to_string() })
    );

    // The replay must go through update, not a second create.
    h.scheduler
        .commit(vec![KvChange::put("iface/eth0", json!({ "mtu": 1500 }))])
        .await
        .unwrap();
    assert_eq!(h.log.take(), ["create iface/eth0", "update sa/1"]);
    assert_eq!(
        h.scheduler.value_status("sa/1").unwrap().state,
        NodeState::Realized
    );
    // Update kept the handle allocated at create time.
    let map = h.scheduler.metadata_map("sa");
    assert_eq!(map.get("sa/1"), Some(json!({ "handle": "h-sa/1" })));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn derived_values_cascade_delete_before_parent() {
    let h = harness();
    h.scheduler
        .commit(vec![
            KvChange::put("iface/eth0", json!({ "mtu": 1500 })),
            KvChange::put("sa/5", json!({ "spi": 1005 })),
            KvChange::put("spd/10", spd_with_bindings()),
        ])
        .await
        .unwrap();
    assert!(h.scheduler.value_status("binding/spd/10/interface/eth0").is_some());
    assert!(h.scheduler.value_status("binding/spd/10/sa/5").is_some());
    h.log.take();

    // Scenario 3: exactly three deletes, parent strictly last.
    h.scheduler
        .commit(vec![KvChange::delete("spd/10")])
        .await
        .unwrap();

    let deletes: Vec<String> = h
        .log
        .take()
        .into_iter()
        .filter(|c| c.starts_with("delete"))
        .collect();
    assert_eq!(deletes.len(), 3);
    assert_eq!(deletes[2], "delete spd/10");
    assert!(deletes[..2].contains(&"delete binding/spd/10/interface/eth0".to_string()));
    assert!(deletes[..2].contains(&"delete binding/spd/10/sa/5".to_string()));

    // No derived key survives its parent.
    assert!(h.scheduler.value_status("spd/10").is_none());
    assert!(h.scheduler.value_status("binding/spd/10/interface/eth0").is_none());
    assert!(h.scheduler.value_status("binding/spd/10/sa/5").is_none());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn derived_set_difference_on_parent_replacement() {
    let h = harness();
    h.scheduler
        .commit(vec![
            KvChange::put("iface/eth0", json!({})),
            KvChange::put("iface/eth1", json!({})),
            KvChange::put(
                "spd/10",
                json!({
                    "rev": 1,
                    "derived": [
                        { "key": "binding/spd/10/interface/eth0",
                          "value": { "deps": ["iface/eth0"] } },
                    ]
                }),
            ),
        ])
        .await
        .unwrap();
    h.log.take();

    // Replace the parent: eth0 binding out, eth1 binding in.
    h.scheduler
        .commit(vec![KvChange::put(
            "spd/10",
            json!({
                "rev": 2,
                "derived": [
                    { "key": "binding/spd/10/interface/eth1",
                      "value": { "deps": ["iface/eth1"] } },
                ]
            }),
        )])
        .await
        .unwrap();

    let calls = h.log.take();
    assert!(calls.contains(&"update spd/10".to_string()));
    assert!(calls.contains(&"delete binding/spd/10/interface/eth0".to_string()));
    assert!(calls.contains(&"create binding/spd/10/interface/eth1".to_string()));
    assert!(h.scheduler.value_status("binding/spd/10/interface/eth0").is_none());
    assert!(h.scheduler.value_status("binding/spd/10/interface/eth1").is_some());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn dependency_cycle_rejects_whole_batch() {
    let h = harness();
    let err = h
        .scheduler
        .commit(vec![
            KvChange::put("sa/1", json!({ "deps": ["sa/2"] })),
            KvChange::put("sa/2", json!({ "deps": ["sa/1"] })),
            KvChange::put("sa/3", json!({})),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, KvsError::DependencyCycle(_)));
    // Nothing from the cyclic batch was applied.
    assert!(h.log.take().is_empty());
    assert!(h.scheduler.value_status("sa/3").is_none());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn failed_op_isolates_independent_ops() {
    let h = harness();
    let result = h
        .scheduler
        .commit(vec![
            KvChange::put("sa/1", json!({ "fail_create": "transient rpc timeout" })),
            KvChange::put("iface/eth0", json!({ "mtu": 1500 })),
        ])
        .await
        .unwrap();

    assert!(matches!(
        result.outcome_for("sa/1"),
        Some(OpOutcome::Failed { retriable: true, .. })
    ));
    assert_eq!(result.outcome_for("iface/eth0"), Some(&OpOutcome::Created));
    assert_eq!(h.log.take(), ["create iface/eth0"]);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn failed_node_never_satisfies_dependents() {
    let h = harness();
    let result = h
        .scheduler
        .commit(vec![
            KvChange::put("sa/1", json!({ "fail_create": "bad index" })),
            KvChange::put("spd/10", json!({ "deps": ["sa/1"] })),
        ])
        .await
        .unwrap();

    // The dependent stays deferred, it is not cascading-failed.
    assert_eq!(
        result.outcome_for("spd/10"),
        Some(&OpOutcome::Deferred { blocked_on: "sa/1".to_string() })
    );
    assert!(matches!(
        h.scheduler.value_status("sa/1").unwrap().state,
        NodeState::Failed { retriable: false, .. }
    ));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn validation_failure_is_rejected_not_retried() {
    let h = harness();
    let result = h
        .scheduler
        .commit(vec![KvChange::put(
            "sa/1",
            json!({ "invalid": "spi must be non-zero" }),
        )])
        .await
        .unwrap();

    assert_eq!(
        result.outcome_for("sa/1"),
        Some(&OpOutcome::Rejected { reason: "spi must be non-zero".to_string() })
    );
    assert!(h.log.take().is_empty());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn reordered_set_members_are_equivalent() {
    let h = harness();
    // Scenario 5: two values differing only in member order.
    h.scheduler
        .commit(vec![KvChange::put(
            "nat/pool/1",
            json!({ "members": ["10.0.0.1", "10.0.0.2"] }),
        )])
        .await
        .unwrap();
    h.log.take();

    let result = h
        .scheduler
        .commit(vec![KvChange::put(
            "nat/pool/1",
            json!({ "members": ["10.0.0.2", "10.0.0.1"] }),
        )])
        .await
        .unwrap();

    assert_eq!(result.outcome_for("nat/pool/1"), Some(&OpOutcome::Noop));
    assert!(h.log.take().is_empty());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn resync_applies_minimal_diff() {
    let h = harness();
    h.scheduler
        .commit(vec![
            KvChange::put("nat/k", json!({ "members": ["a", "b"] })),
            KvChange::put("nat/m", json!({ "limit": 10 })),
        ])
        .await
        .unwrap();
    h.log.take();

    // Dump: K equivalent (members reordered), M differing.
    h.nat.set_dump(vec![
        ("nat/k", json!({ "members": ["b", "a"] }), Some(json!({ "handle": 1 }))),
        ("nat/m", json!({ "limit": 5 }), Some(json!({ "handle": 2 }))),
    ]);

    let result = h.scheduler.resync().await.unwrap();
    assert_eq!(h.log.take(), ["update nat/m"]);
    assert_eq!(result.outcome_for("nat/k"), Some(&OpOutcome::Noop));
    assert_eq!(result.outcome_for("nat/m"), Some(&OpOutcome::Updated));

    // Rediscovered metadata was seeded from the dump.
    let map = h.scheduler.metadata_map("nat");
    assert_eq!(map.get("nat/k"), Some(json!({ "handle": 1 })));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn resync_deletes_obsolete_dataplane_objects() {
    let h = harness();
    // Scenario 4: the dataplane has an address nobody desires.
    h.nat.set_dump(vec![(
        "nat/addr/192.168.0.1",
        json!({ "pool": 1 }),
        Some(json!({ "handle": 9 })),
    )]);

    let result = h.scheduler.resync().await.unwrap();
    assert_eq!(h.log.take(), ["delete nat/addr/192.168.0.1"]);
    assert_eq!(
        result.outcome_for("nat/addr/192.168.0.1"),
        Some(&OpOutcome::Deleted)
    );
    assert!(h.scheduler.value_status("nat/addr/192.168.0.1").is_none());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn resync_twice_is_idempotent() {
    let h = harness();
    h.scheduler
        .commit(vec![KvChange::put("nat/k", json!({ "members": ["a"] }))])
        .await
        .unwrap();
    h.nat.set_dump(vec![(
        "nat/k",
        json!({ "members": ["a"] }),
        Some(json!({ "handle": 3 })),
    )]);
    h.log.take();

    h.scheduler.resync().await.unwrap();
    h.scheduler.resync().await.unwrap();

    // Converged state: neither pass touched the dataplane.
    assert!(h.log.take().is_empty());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn resync_recreates_values_missing_from_dump() {
    let h = harness();
    h.scheduler
        .commit(vec![KvChange::put("nat/k", json!({ "members": ["a"] }))])
        .await
        .unwrap();
    h.log.take();

    // Empty dump: the object vanished behind our back.
    h.nat.set_dump(vec![]);
    let result = h.scheduler.resync().await.unwrap();

    assert_eq!(h.log.take(), ["create nat/k"]);
    assert_eq!(result.outcome_for("nat/k"), Some(&OpOutcome::Created));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn update_with_recreate_deletes_then_creates() {
    let h = harness();
    h.scheduler
        .commit(vec![KvChange::put("iface/eth0", json!({ "mtu": 1500 }))])
        .await
        .unwrap();
    h.log.take();

    let result = h
        .scheduler
        .commit(vec![KvChange::put(
            "iface/eth0",
            json!({ "mtu": 9000, "recreate": true }),
        )])
        .await
        .unwrap();

    assert_eq!(h.log.take(), ["delete iface/eth0", "create iface/eth0"]);
    assert_eq!(result.outcome_for("iface/eth0"), Some(&OpOutcome::Recreated));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn metadata_tracks_create_and_delete() {
    let h = harness();
    h.scheduler
        .commit(vec![KvChange::put("iface/eth0", json!({ "mtu": 1500 }))])
        .await
        .unwrap();

    let map = h.scheduler.metadata_map("interface");
    assert_eq!(map.get("iface/eth0"), Some(json!({ "handle": "h-iface/eth0" })));

    h.scheduler
        .commit(vec![KvChange::delete("iface/eth0")])
        .await
        .unwrap();
    assert_eq!(map.get("iface/eth0"), None);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn failed_update_keeps_handle_for_delete() {
    let h = harness();
    h.scheduler
        .commit(vec![KvChange::put("sa/1", json!({ "spi": 1 }))])
        .await
        .unwrap();
    h.log.take();

    let result = h
        .scheduler
        .commit(vec![KvChange::put(
            "sa/1",
            json!({ "spi": 2, "fail_update": "rejected by dataplane" }),
        )])
        .await
        .unwrap();
    assert!(matches!(
        result.outcome_for("sa/1"),
        Some(OpOutcome::Failed { retriable: false, .. })
    ));
    // The object created with spi 1 is still out there; its handle
    // must survive the failed update.
    let map = h.scheduler.metadata_map("sa");
    assert_eq!(map.get("sa/1"), Some(json!({ "handle": "h-sa/1" })));

    let result = h
        .scheduler
        .commit(vec![KvChange::delete("sa/1")])
        .await
        .unwrap();
    assert_eq!(h.log.take(), ["delete sa/1"]);
    assert_eq!(result.outcome_for("sa/1"), Some(&OpOutcome::Deleted));
    assert_eq!(map.get("sa/1"), None);
    assert!(h.scheduler.value_status("sa/1").is_none());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn cancelled_transaction_skips_remaining_ops() {
    let h = harness();
    let (tx, rx) = tokio::sync::watch::channel(true);

    let result = h
        .scheduler
        .commit_with_cancel(
            vec![
                KvChange::put("iface/eth0", json!({})),
                KvChange::put("iface/eth1", json!({})),
            ],
            rx,
        )
        .await
        .unwrap();
    drop(tx);

    assert!(h.log.take().is_empty());
    assert!(result
        .records
        .iter()
        .all(|r| r.outcome == OpOutcome::Cancelled));
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn notification_replays_parked_operations() {
    let h = harness();
    // Depends on a key no descriptor manages — only an external event
    // can realize it.
    let result = h
        .scheduler
        .commit(vec![KvChange::put(
            "sa/1",
            json!({ "deps": ["ext/link/0"] }),
        )])
        .await
        .unwrap();
    assert!(matches!(
        result.outcome_for("sa/1"),
        Some(OpOutcome::Deferred { .. })
    ));

    h.scheduler
        .notifier()
        .send(gridplane_kvs::ExternalNotification::appeared(
            "ext/link/0",
            Some(json!({ "up": true })),
        ))
        .await
        .unwrap();

    // The replay happens on the worker; poll until it lands.
    let mut realized = false;
    for _ in 0..100 {
        if h.scheduler.value_status("sa/1").map(|s| s.state) == Some(NodeState::Realized) {
            realized = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(realized, "sa/1 never realized after notification");
    assert_eq!(h.log.snapshot(), ["create sa/1"]);
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn disappeared_dependency_demotes_and_replays_on_return() {
    let h = harness();
    h.scheduler
        .commit(vec![
            KvChange::put("iface/eth0", json!({ "mtu": 1500 })),
            KvChange::put("sa/1", json!({ "spi": 1, "deps": ["iface/eth0"] })),
        ])
        .await
        .unwrap();
    h.log.take();

    h.scheduler
        .notifier()
        .send(gridplane_kvs::ExternalNotification::disappeared("iface/eth0"))
        .await
        .unwrap();

    // The dependent falls back to pending, parked on the vanished key.
    let mut demoted = false;
    for _ in 0..100 {
        if h.scheduler.value_status("sa/1").map(|s| s.state)
            == Some(NodeState::Pending { blocked_on: "iface/eth0".to_string() })
        {
            demoted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(demoted, "sa/1 never demoted after dependency vanished");
    assert!(matches!(
        h.scheduler.value_status("iface/eth0").unwrap().state,
        NodeState::Failed { retriable: true, .. }
    ));

    // The key coming back replays the parked dependent. Its value is
    // unchanged and already applied, so no descriptor call is made.
    h.scheduler
        .notifier()
        .send(gridplane_kvs::ExternalNotification::appeared("iface/eth0", None))
        .await
        .unwrap();

    let mut realized = false;
    for _ in 0..100 {
        if h.scheduler.value_status("sa/1").map(|s| s.state) == Some(NodeState::Realized) {
            realized = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(realized, "sa/1 never replayed after dependency returned");
    assert!(h.log.take().is_empty());
    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn status_dump_reports_pending_and_failed_reasons() {
    let h = harness();
    h.scheduler
        .commit(vec![
            KvChange::put("spd/10", json!({ "deps": ["sa/5"] })),
            KvChange::put("sa/1", json!({ "fail_create": "bad index" })),
        ])
        .await
        .unwrap();

    let statuses = h.scheduler.dump_status();
    let spd = statuses.iter().find(|s| s.key == "spd/10").unwrap();
    assert_eq!(
        spd.state,
        NodeState::Pending { blocked_on: "sa/5".to_string() }
    );
    let sa = statuses.iter().find(|s| s.key == "sa/1").unwrap();
    assert!(matches!(
        &sa.state,
        NodeState::Failed { error, retriable: false } if error.contains("bad index")
    ));
    h.scheduler.shutdown().await;
}

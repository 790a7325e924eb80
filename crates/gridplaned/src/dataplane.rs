//! Dataplane boundary.
//!
//! The agent talks to the packet processor over a serialized
//! request/response channel; everything behind `Dataplane` is opaque to
//! the engine. Objects are keyed by a dataplane-assigned numeric
//! handle, which descriptors store as metadata and thread back through
//! update/delete calls. `MockDataplane` is the in-memory implementation
//! used by the demo mode and the integration tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// One object as the dataplane reports it.
#[derive(Debug, Clone, Serialize)]
pub struct DataplaneObject {
    pub handle: u32,
    pub kind: String,
    pub name: String,
    pub attrs: Value,
}

/// The serialized RPC boundary to the packet processor.
#[async_trait]
pub trait Dataplane: Send + Sync {
    /// Create an object; returns the dataplane-assigned handle.
    async fn create_object(&self, kind: &str, name: &str, attrs: &Value) -> anyhow::Result<u32>;

    /// Replace the attributes of an existing object in place.
    async fn update_object(&self, handle: u32, attrs: &Value) -> anyhow::Result<()>;

    async fn delete_object(&self, handle: u32) -> anyhow::Result<()>;

    /// Dump all objects of one kind.
    async fn dump(&self, kind: &str) -> anyhow::Result<Vec<DataplaneObject>>;
}

/// Shared dataplane handle with a per-RPC timeout. A timed-out
/// operation surfaces as a failed op; the next resync retries it.
#[derive(Clone)]
pub struct DataplaneClient {
    dataplane: Arc<dyn Dataplane>,
    timeout: Duration,
}

impl DataplaneClient {
    pub fn new(dataplane: Arc<dyn Dataplane>, timeout: Duration) -> Self {
        Self { dataplane, timeout }
    }

    pub async fn create_object(
        &self,
        kind: &str,
        name: &str,
        attrs: &Value,
    ) -> anyhow::Result<u32> {
        self.timed(self.dataplane.create_object(kind, name, attrs))
            .await
    }

    pub async fn update_object(&self, handle: u32, attrs: &Value) -> anyhow::Result<()> {
        self.timed(self.dataplane.update_object(handle, attrs)).await
    }

    pub async fn delete_object(&self, handle: u32) -> anyhow::Result<()> {
        self.timed(self.dataplane.delete_object(handle)).await
    }

    pub async fn dump(&self, kind: &str) -> anyhow::Result<Vec<DataplaneObject>> {
        self.timed(self.dataplane.dump(kind)).await
    }

    async fn timed<T>(
        &self,
        rpc: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(self.timeout, rpc).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("dataplane rpc timed out after {:?}", self.timeout),
        }
    }
}

#[derive(Debug, Default)]
struct MockInner {
    objects: BTreeMap<u32, DataplaneObject>,
    next_handle: u32,
}

/// In-memory dataplane: allocates handles, keeps objects in a map.
#[derive(Debug, Default)]
pub struct MockDataplane {
    inner: Mutex<MockInner>,
}

impl MockDataplane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an object by kind and name.
    pub fn find(&self, kind: &str, name: &str) -> Option<DataplaneObject> {
        let inner = self.inner.lock().expect("mock dataplane lock poisoned");
        inner
            .objects
            .values()
            .find(|o| o.kind == kind && o.name == name)
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        let inner = self.inner.lock().expect("mock dataplane lock poisoned");
        inner.objects.len()
    }

    /// Seed an object behind the agent's back, as if it predated the
    /// agent or was configured out of band.
    pub fn seed(&self, kind: &str, name: &str, attrs: Value) -> u32 {
        let mut inner = self.inner.lock().expect("mock dataplane lock poisoned");
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.objects.insert(
            handle,
            DataplaneObject {
                handle,
                kind: kind.to_string(),
                name: name.to_string(),
                attrs,
            },
        );
        handle
    }
}

#[async_trait]
impl Dataplane for MockDataplane {
    async fn create_object(&self, kind: &str, name: &str, attrs: &Value) -> anyhow::Result<u32> {
        let mut inner = self.inner.lock().expect("mock dataplane lock poisoned");
        if inner
            .objects
            .values()
            .any(|o| o.kind == kind && o.name == name)
        {
            anyhow::bail!("{kind} '{name}' already exists");
        }
        inner.next_handle += 1;
        let handle = inner.next_handle;
        inner.objects.insert(
            handle,
            DataplaneObject {
                handle,
                kind: kind.to_string(),
                name: name.to_string(),
                attrs: attrs.clone(),
            },
        );
        debug!(kind, name, handle, "mock dataplane: object created");
        Ok(handle)
    }

    async fn update_object(&self, handle: u32, attrs: &Value) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("mock dataplane lock poisoned");
        let object = inner
            .objects
            .get_mut(&handle)
            .ok_or_else(|| anyhow::anyhow!("no object with handle {handle}"))?;
        object.attrs = attrs.clone();
        debug!(handle, "mock dataplane: object updated");
        Ok(())
    }

    async fn delete_object(&self, handle: u32) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().expect("mock dataplane lock poisoned");
        inner
            .objects
            .remove(&handle)
            .ok_or_else(|| anyhow::anyhow!("no object with handle {handle}"))?;
        debug!(handle, "mock dataplane: object deleted");
        Ok(())
    }

    async fn dump(&self, kind: &str) -> anyhow::Result<Vec<DataplaneObject>> {
        let inner = self.inner.lock().expect("mock dataplane lock poisoned");
        Ok(inner
            .objects
            .values()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect())
    }
}

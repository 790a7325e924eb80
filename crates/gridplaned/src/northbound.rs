//! Northbound desired-state source.
//!
//! Desired configuration arrives as a JSON snapshot file: an array of
//! `{ "key": ..., "value": ... }` records. `FileSource` polls the file,
//! keeps the last delivered snapshot, and commits only the delta as one
//! transaction. The first successful delivery instead installs the full
//! snapshot and runs a startup resync, so the agent converges against
//! whatever the dataplane already holds.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use gridplane_core::{KvPair, keys::parse_key};
use gridplane_kvs::{KvChange, KvScheduler};

pub struct FileSource {
    path: PathBuf,
    label: String,
    /// Snapshot as of the last committed delivery; `None` until the
    /// first successful load.
    last: Option<BTreeMap<String, Value>>,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self { path: path.into(), label: label.into(), last: None }
    }

    /// Read and filter the snapshot file. Records with malformed keys
    /// or a foreign agent label are skipped, not fatal.
    fn load(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        let content = std::fs::read_to_string(&self.path)?;
        let records: Vec<KvPair> = serde_json::from_str(&content)?;

        let mut snapshot = BTreeMap::new();
        for record in records {
            match parse_key(&record.key) {
                Ok(parsed) if parsed.label == self.label => {
                    snapshot.insert(record.key, record.value);
                }
                Ok(parsed) => {
                    debug!(key = %record.key, label = %parsed.label, "record targets another agent");
                }
                Err(err) => {
                    warn!(key = %record.key, error = %err, "skipping malformed record");
                }
            }
        }
        Ok(snapshot)
    }

    /// Changes turning `prev` into `next`: puts for new or changed
    /// keys, deletes for vanished ones.
    fn delta(prev: &BTreeMap<String, Value>, next: &BTreeMap<String, Value>) -> Vec<KvChange> {
        let mut changes = Vec::new();
        for (key, value) in next {
            if prev.get(key) != Some(value) {
                changes.push(KvChange::put(key.clone(), value.clone()));
            }
        }
        for key in prev.keys() {
            if !next.contains_key(key) {
                changes.push(KvChange::delete(key.clone()));
            }
        }
        changes
    }

    async fn poll_once(&mut self, scheduler: &KvScheduler) -> anyhow::Result<()> {
        let snapshot = self.load()?;

        match &self.last {
            None => {
                info!(records = snapshot.len(), "first snapshot delivery");
                let changes: Vec<KvChange> = snapshot
                    .iter()
                    .map(|(key, value)| KvChange::put(key.clone(), value.clone()))
                    .collect();
                if !changes.is_empty() {
                    let result = scheduler.commit(changes).await?;
                    info!(
                        ops = result.records.len(),
                        failed = result.failed_count(),
                        "initial snapshot committed"
                    );
                }
                // Converge against pre-existing dataplane state.
                scheduler.resync().await?;
            }
            Some(prev) => {
                let changes = Self::delta(prev, &snapshot);
                if !changes.is_empty() {
                    info!(changes = changes.len(), "desired state changed");
                    let result = scheduler.commit(changes).await?;
                    if result.failed_count() > 0 {
                        warn!(failed = result.failed_count(), "snapshot delta partially failed");
                    }
                }
            }
        }
        self.last = Some(snapshot);
        Ok(())
    }

    /// Poll loop; exits on the shutdown signal.
    pub async fn run(
        mut self,
        scheduler: Arc<KvScheduler>,
        poll: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(path = ?self.path, "northbound file source started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {
                    if let Err(err) = self.poll_once(&scheduler).await {
                        warn!(error = %err, "snapshot poll failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("northbound file source stopped");
    }
}

//! External notification channel.
//!
//! Asynchronous events from outside the desired-state pipeline (an
//! interface appeared on the dataplane, a link went away) are delivered
//! here and turned into small replay batches by the engine worker.
//! They never preempt an in-flight transaction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{KvsError, KvsResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// The key now exists on the dataplane; operations parked on it
    /// become eligible for replay.
    Appeared,
    /// The key vanished from the dataplane; its dependents fall back to
    /// pending.
    Disappeared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalNotification {
    pub key: String,
    pub kind: NotificationKind,
    /// Observed value, when the event source has one.
    pub value: Option<Value>,
}

impl ExternalNotification {
    pub fn appeared(key: impl Into<String>, value: Option<Value>) -> Self {
        Self { key: key.into(), kind: NotificationKind::Appeared, value }
    }

    pub fn disappeared(key: impl Into<String>) -> Self {
        Self { key: key.into(), kind: NotificationKind::Disappeared, value: None }
    }
}

/// Cloneable handle for injecting notifications into the engine.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<ExternalNotification>,
}

impl NotificationSender {
    pub(crate) fn new(tx: mpsc::Sender<ExternalNotification>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, notification: ExternalNotification) -> KvsResult<()> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| KvsError::QueueClosed)
    }
}

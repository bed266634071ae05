//! Lifecycle deltas
//!
//! Read-only stream of isolate and channel lifecycle changes for external
//! inspection tooling. The runtime never consumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    /// Isolate built and running
    Start,
    /// Isolate failed
    Die,
    /// Isolate terminated
    Term,
    /// Channel opened
    Open,
    /// Channel sealed
    Seal,
}

/// One lifecycle change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub kind: DeltaKind,
    pub at: DateTime<Utc>,
    /// Isolate name, or full channel name for channel deltas
    pub name: String,
    /// Frame id, or connector id for channel deltas
    pub id: u64,
}

impl Delta {
    pub fn new(kind: DeltaKind, name: &str, id: u64) -> Self {
        Self {
            kind,
            at: Utc::now(),
            name: name.to_string(),
            id,
        }
    }

    pub fn is_isolate(&self) -> bool {
        matches!(self.kind, DeltaKind::Start | DeltaKind::Die | DeltaKind::Term)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Broadcast fan-out of deltas; slow subscribers observe a lag error
#[derive(Debug)]
pub struct DeltaStream {
    sender: broadcast::Sender<Delta>,
}

impl DeltaStream {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, delta: Delta) {
        // No subscribers is the common case
        let _ = self.sender.send(delta);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Delta> {
        self.sender.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.sender.receiver_count()
    }
}

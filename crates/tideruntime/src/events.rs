use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type RunId = Uuid;

/// Events emitted while a flow run is driven to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    FlowStarted {
        run_id: RunId,
        flow: String,
        timestamp: DateTime<Utc>,
    },
    FlowCompleted {
        run_id: RunId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        run_id: RunId,
        task: String,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        run_id: RunId,
        task: String,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        run_id: RunId,
        task: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for run events. Emission never blocks; events are
/// dropped when no subscriber is listening.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> EventBus {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

use crate::{ExecutionContext, FailureKind, RunId, RunStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events emitted by the scheduler during a run. `TickCompleted` carries a
/// full context snapshot after every tick and lifecycle transition, which is
/// the whole observer surface: no UI framework leaks into the core.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RunStarted {
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },
    RunPaused {
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },
    RunResumed {
        run_id: RunId,
        timestamp: DateTime<Utc>,
    },
    RunStopped {
        run_id: RunId,
        status: RunStatus,
        timestamp: DateTime<Utc>,
    },
    RunSettled {
        run_id: RunId,
        status: RunStatus,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: RunId,
        node_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: RunId,
        node_id: String,
        kind: FailureKind,
        error: String,
        attempt: u32,
        terminal: bool,
        timestamp: DateTime<Utc>,
    },
    DeadlockDetected {
        run_id: RunId,
        pending: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    ApprovalRequested {
        run_id: RunId,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    TickCompleted {
        run_id: RunId,
        context: Arc<ExecutionContext>,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast fan-out for engine events. Sends to zero receivers are fine.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

//! Observability event broadcasting.
//!
//! Sessions and agent runs report progress here so observability consumers
//! (a transport layer, a dashboard, tests) can watch what the core is doing
//! without touching any session gate. Delivery is lossy for slow
//! subscribers; the bus never blocks an in-flight action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::state::SessionId;

/// Default channel capacity. Subscribers that fall further behind than this
/// miss events (lag) rather than slowing the producer.
const DEFAULT_CAPACITY: usize = 1024;

/// What happened, without any payload heavy enough to matter on a hot path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionEventKind {
    /// A session was provisioned and registered.
    Created,
    /// One action executed successfully.
    ActionExecuted { action: String },
    /// One action failed.
    ActionFailed { action: String, message: String },
    /// The remote desktop was restarted.
    Restarted,
    /// The session reached its terminal state.
    ShutDown,
    /// An agent run started against this session.
    RunStarted { instruction: String },
    /// An agent run completed one turn.
    TurnCompleted { turn: u32 },
    /// An agent run finished.
    RunFinished { outcome: String },
}

/// A timestamped event about one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub kind: SessionEventKind,
    pub at: DateTime<Utc>,
}

/// Broadcast bus for [`SessionEvent`]s.
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Returns the number of subscribers that received it;
    /// zero subscribers is not an error.
    pub fn emit(&self, session_id: &SessionId, kind: SessionEventKind) -> usize {
        let event = SessionEvent {
            session_id: session_id.clone(),
            kind,
            at: Utc::now(),
        };
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

//! Session identifiers, lifecycle states, and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session. Generated by the core, never by callers,
/// and never reused after disposal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a session.
///
/// Transitions happen only through the documented `Session` operations:
/// `Uninitialized` → `Ready` on successful provisioning; `Ready` ↔ `Busy`
/// around every action; `Restarting` while a restart is in flight; `Failed`
/// when a restart is refused by the provider; `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Uninitialized,
    Ready,
    Busy,
    Restarting,
    Shutdown,
    Failed,
}

impl SessionState {
    /// Terminal states accept no further actions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Shutdown | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Restarting => "restarting",
            SessionState::Shutdown => "shutdown",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Read-only snapshot of a session's bookkeeping, taken without blocking on
/// any in-flight remote call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: SessionId,
    pub state: SessionState,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

//! The process-wide session registry.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};

use super::session::Session;
use super::state::{SessionId, SessionState};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Thread-safe map from [`SessionId`] to live sessions.
///
/// Disposed ids are tombstoned: once a session is removed, its id resolves to
/// `NotFound` forever and is never reissued to a new session.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    retired: Mutex<HashSet<SessionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashSet::new()),
        }
    }

    /// Register a freshly created session under its own id.
    pub fn register(&self, session: Arc<Session>) -> SessionId {
        let id = session.id().clone();
        lock(&self.sessions).insert(id.clone(), session);
        log::debug!("registered session {}", id);
        id
    }

    /// Resolve an id to its live session.
    pub fn get(&self, id: &SessionId) -> Result<Arc<Session>> {
        lock(&self.sessions)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Snapshot of all live sessions and their states, in no particular
    /// order. Never blocks on any session gate.
    pub fn list(&self) -> Vec<(SessionId, SessionState)> {
        lock(&self.sessions)
            .values()
            .map(|s| (s.id().clone(), s.state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sessions).is_empty()
    }

    /// Remove a session that has reached `Shutdown` and tombstone its id.
    ///
    /// Removing a live session is refused; shut it down first.
    pub fn remove(&self, id: &SessionId) -> Result<()> {
        let mut sessions = lock(&self.sessions);
        let session = sessions.get(id).ok_or_else(|| Error::NotFound(id.clone()))?;

        let state = session.state();
        if state != SessionState::Shutdown {
            return Err(Error::InvalidState {
                operation: "remove".to_string(),
                state,
            });
        }

        sessions.remove(id);
        lock(&self.retired).insert(id.clone());
        log::debug!("removed session {}", id);
        Ok(())
    }

    /// Whether an id once belonged to a session that has since been removed.
    pub fn is_retired(&self, id: &SessionId) -> bool {
        lock(&self.retired).contains(id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

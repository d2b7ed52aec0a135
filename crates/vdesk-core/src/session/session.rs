//! One session: an exclusively-owned remote desktop handle, its lifecycle
//! state, and the gate that serializes every action issued against it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::action::{ActionRequest, ActionResult};
use crate::cancel::CancelToken;
use crate::config::DesktopConfig;
use crate::error::{Error, Result};
use crate::logging::{log_line, open_session_log, LogHandle};
use crate::provider::{DesktopHandle, DesktopProvider};

use super::state::{SessionId, SessionState, SessionStatus};

/// Bookkeeping fields, kept behind their own lock so status reads never
/// block on an in-flight remote call.
struct Bookkeeping {
    state: SessionState,
    last_error: Option<Error>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
}

/// A lock acquisition that must survive a poisoned mutex: the gate has to be
/// released and reacquired cleanly even if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One remote virtual desktop with serialized access.
///
/// The gate (a mutex over the provider handle) is the only path to the
/// remote: at most one action executes against the handle at any instant,
/// regardless of how many callers or agent runs share the session.
pub struct Session {
    id: SessionId,
    provider: Arc<dyn DesktopProvider>,
    config: DesktopConfig,
    gate: Mutex<Option<DesktopHandle>>,
    meta: Mutex<Bookkeeping>,
    log: LogHandle,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Provision a remote desktop and return a session owning it.
    ///
    /// On provisioning failure the error is returned and no session exists;
    /// the caller registers nothing.
    pub fn create(
        provider: Arc<dyn DesktopProvider>,
        config: DesktopConfig,
        log_dir: Option<&str>,
    ) -> Result<Self> {
        let id = SessionId::new();
        let log = open_session_log(log_dir, &id.0);
        let now = Utc::now();

        let session = Self {
            id: id.clone(),
            provider,
            config,
            gate: Mutex::new(None),
            meta: Mutex::new(Bookkeeping {
                state: SessionState::Uninitialized,
                last_error: None,
                created_at: now,
                last_active_at: now,
            }),
            log,
        };

        match session.provider.provision(&session.config) {
            Ok(handle) => {
                *lock(&session.gate) = Some(handle);
                lock(&session.meta).state = SessionState::Ready;
                log::info!("session {} ready", session.id);
                log_line(&session.log, "ACTION", "session provisioned");
                Ok(session)
            }
            Err(err) => {
                log::error!("provisioning failed for session {}: {}", id, err);
                Err(err)
            }
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn config(&self) -> &DesktopConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        lock(&self.meta).state
    }

    pub fn is_busy(&self) -> bool {
        self.state() == SessionState::Busy
    }

    /// Snapshot of the session's bookkeeping. Never blocks on the gate.
    pub fn status(&self) -> SessionStatus {
        let meta = lock(&self.meta);
        SessionStatus {
            id: self.id.clone(),
            state: meta.state,
            last_error: meta.last_error.as_ref().map(|e| e.to_string()),
            created_at: meta.created_at,
            last_active_at: meta.last_active_at,
        }
    }

    /// Execute one action, serialized through the session gate.
    ///
    /// Blocks until the gate is free; concurrent callers queue first come
    /// first served. A failed action leaves the session `Ready` with
    /// `last_error` recorded, never stuck `Busy`.
    pub fn act(&self, request: &ActionRequest) -> Result<ActionResult> {
        self.act_with_cancel(request, &CancelToken::new())
    }

    /// Like [`Session::act`], but a cancelled token cuts a `Wait` short and
    /// surfaces as a `Timeout`.
    pub fn act_with_cancel(
        &self,
        request: &ActionRequest,
        cancel: &CancelToken,
    ) -> Result<ActionResult> {
        request.validate(&self.config)?;

        // Fast fail on terminal sessions without touching the gate or the
        // remote.
        {
            let meta = lock(&self.meta);
            if meta.state.is_terminal() {
                return Err(Error::SessionUnavailable(self.id.clone()));
            }
        }

        let gate = lock(&self.gate);

        // The session may have been shut down while we queued.
        {
            let mut meta = lock(&self.meta);
            if meta.state.is_terminal() {
                return Err(Error::SessionUnavailable(self.id.clone()));
            }
            meta.state = SessionState::Busy;
        }

        log_line(&self.log, "ACTION", &request.describe());
        let result = self.execute_gated(&gate, request, cancel);
        drop(gate);

        let mut meta = lock(&self.meta);
        // A shutdown queued behind this action may already have taken the
        // gate and marked the session terminal; never overwrite that.
        if meta.state == SessionState::Busy {
            meta.state = SessionState::Ready;
        }
        meta.last_active_at = Utc::now();
        match &result {
            Ok(_) => {
                meta.last_error = None;
                log_line(&self.log, "RESULT", "ok");
            }
            Err(err) => {
                meta.last_error = Some(err.clone());
                log_line(&self.log, "ERROR", &err.to_string());
                log::warn!("action failed on session {}: {}", self.id, err);
            }
        }
        result
    }

    fn execute_gated(
        &self,
        gate: &MutexGuard<'_, Option<DesktopHandle>>,
        request: &ActionRequest,
        cancel: &CancelToken,
    ) -> Result<ActionResult> {
        // Wait suspends locally; the remote never sees it.
        if let ActionRequest::Wait { seconds } = request {
            return if cancel.sleep(Duration::from_secs_f64(*seconds)) {
                Ok(ActionResult::Ack {
                    detail: format!("waited {}s", seconds),
                })
            } else {
                Err(Error::Timeout {
                    operation: "wait".to_string(),
                    detail: "cancelled before completion".to_string(),
                })
            };
        }

        let handle = gate
            .as_ref()
            .ok_or_else(|| Error::SessionUnavailable(self.id.clone()))?;
        self.provider.execute(handle, request)
    }

    /// Restart the remote desktop. Queues behind any in-flight action.
    ///
    /// A provider-refused restart marks the session `Failed`; it can then
    /// only be shut down.
    pub fn restart(&self) -> Result<()> {
        {
            let meta = lock(&self.meta);
            if meta.state.is_terminal() {
                return Err(Error::InvalidState {
                    operation: "restart".to_string(),
                    state: meta.state,
                });
            }
        }

        let gate = lock(&self.gate);

        {
            let mut meta = lock(&self.meta);
            if meta.state.is_terminal() {
                return Err(Error::InvalidState {
                    operation: "restart".to_string(),
                    state: meta.state,
                });
            }
            meta.state = SessionState::Restarting;
        }

        let handle = gate
            .as_ref()
            .ok_or_else(|| Error::SessionUnavailable(self.id.clone()))?;
        let result = self.provider.restart(handle);
        drop(gate);

        let mut meta = lock(&self.meta);
        meta.last_active_at = Utc::now();
        match &result {
            Ok(()) => {
                if meta.state == SessionState::Restarting {
                    meta.state = SessionState::Ready;
                }
                meta.last_error = None;
                log::info!("session {} restarted", self.id);
                log_line(&self.log, "RESULT", "restarted");
            }
            Err(err) => {
                if meta.state == SessionState::Restarting {
                    meta.state = SessionState::Failed;
                }
                meta.last_error = Some(err.clone());
                log::error!("restart failed for session {}: {}", self.id, err);
                log_line(&self.log, "ERROR", &err.to_string());
            }
        }
        result
    }

    /// Shut the remote desktop down and release the handle. Terminal and
    /// idempotent.
    ///
    /// A provider-side shutdown failure is logged but does not keep the
    /// session alive: the handle is released and the state becomes
    /// `Shutdown` regardless, so the registry can dispose of it.
    pub fn shutdown(&self) -> Result<()> {
        let mut gate = lock(&self.gate);

        {
            let meta = lock(&self.meta);
            if meta.state == SessionState::Shutdown {
                return Ok(());
            }
        }

        if let Some(handle) = gate.take() {
            if let Err(err) = self.provider.terminate(&handle) {
                log::warn!(
                    "provider error during shutdown of session {}: {}; releasing handle anyway",
                    self.id,
                    err
                );
            }
        }
        drop(gate);

        let mut meta = lock(&self.meta);
        meta.state = SessionState::Shutdown;
        meta.last_active_at = Utc::now();
        log::info!("session {} shut down", self.id);
        log_line(&self.log, "RESULT", "shutdown");
        Ok(())
    }

    /// Provider-side status for this desktop.
    pub fn remote_status(&self) -> Result<serde_json::Value> {
        {
            let meta = lock(&self.meta);
            if meta.state.is_terminal() {
                return Err(Error::SessionUnavailable(self.id.clone()));
            }
        }
        let gate = lock(&self.gate);
        let handle = gate
            .as_ref()
            .ok_or_else(|| Error::SessionUnavailable(self.id.clone()))?;
        self.provider.status(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Instant;

    /// Scripted provider that records call counts and detects overlapping
    /// execution.
    struct StubProvider {
        calls: AtomicU32,
        in_flight: AtomicU32,
        max_overlap: AtomicU32,
        execute_delay: Duration,
        fail_execute: AtomicBool,
        fail_restart: AtomicBool,
        fail_terminate: AtomicBool,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                in_flight: AtomicU32::new(0),
                max_overlap: AtomicU32::new(0),
                execute_delay: Duration::ZERO,
                fail_execute: AtomicBool::new(false),
                fail_restart: AtomicBool::new(false),
                fail_terminate: AtomicBool::new(false),
            }
        }

        fn with_delay(delay: Duration) -> Self {
            Self {
                execute_delay: delay,
                ..Self::new()
            }
        }
    }

    impl DesktopProvider for StubProvider {
        fn provision(&self, _config: &DesktopConfig) -> Result<DesktopHandle> {
            Ok(DesktopHandle {
                project_id: "proj-1".to_string(),
            })
        }

        fn execute(
            &self,
            _handle: &DesktopHandle,
            request: &ActionRequest,
        ) -> Result<ActionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_overlap.fetch_max(current, Ordering::SeqCst);

            if !self.execute_delay.is_zero() {
                std::thread::sleep(self.execute_delay);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_execute.load(Ordering::SeqCst) {
                return Err(Error::Remote("execute refused".to_string()));
            }
            match request {
                ActionRequest::Screenshot => Ok(ActionResult::Image {
                    base64: "aW1n".to_string(),
                }),
                _ => Ok(ActionResult::Ack {
                    detail: request.describe(),
                }),
            }
        }

        fn restart(&self, _handle: &DesktopHandle) -> Result<()> {
            if self.fail_restart.load(Ordering::SeqCst) {
                return Err(Error::Remote("restart refused".to_string()));
            }
            Ok(())
        }

        fn terminate(&self, _handle: &DesktopHandle) -> Result<()> {
            if self.fail_terminate.load(Ordering::SeqCst) {
                return Err(Error::Remote("terminate refused".to_string()));
            }
            Ok(())
        }

        fn status(&self, _handle: &DesktopHandle) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"state": "running"}))
        }
    }

    struct FailingProvisioner;

    impl DesktopProvider for FailingProvisioner {
        fn provision(&self, _config: &DesktopConfig) -> Result<DesktopHandle> {
            Err(Error::Remote("no capacity".to_string()))
        }
        fn execute(&self, _h: &DesktopHandle, _r: &ActionRequest) -> Result<ActionResult> {
            unreachable!("never provisioned")
        }
        fn restart(&self, _h: &DesktopHandle) -> Result<()> {
            unreachable!("never provisioned")
        }
        fn terminate(&self, _h: &DesktopHandle) -> Result<()> {
            unreachable!("never provisioned")
        }
        fn status(&self, _h: &DesktopHandle) -> Result<serde_json::Value> {
            unreachable!("never provisioned")
        }
    }

    fn session_with(provider: Arc<StubProvider>) -> Session {
        Session::create(provider, DesktopConfig::default(), None).unwrap()
    }

    fn click() -> ActionRequest {
        ActionRequest::Click {
            x: 100,
            y: 200,
            button: crate::action::MouseButton::Left,
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn create_transitions_to_ready() {
            let session = session_with(Arc::new(StubProvider::new()));
            assert_eq!(session.state(), SessionState::Ready);
            assert!(session.status().last_error.is_none());
        }

        #[test]
        fn create_failure_propagates_remote_error() {
            let result = Session::create(
                Arc::new(FailingProvisioner),
                DesktopConfig::default(),
                None,
            );
            assert_eq!(result.unwrap_err().kind(), ErrorKind::Remote);
        }

        #[test]
        fn restart_returns_to_ready() {
            let session = session_with(Arc::new(StubProvider::new()));
            session.restart().unwrap();
            assert_eq!(session.state(), SessionState::Ready);
        }

        #[test]
        fn failed_restart_marks_session_failed() {
            let provider = Arc::new(StubProvider::new());
            provider.fail_restart.store(true, Ordering::SeqCst);
            let session = session_with(Arc::clone(&provider));

            assert!(session.restart().is_err());
            assert_eq!(session.state(), SessionState::Failed);
            assert!(session.status().last_error.is_some());

            // Failed sessions refuse actions but still shut down.
            let err = session.act(&click()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SessionUnavailable);
            session.shutdown().unwrap();
            assert_eq!(session.state(), SessionState::Shutdown);
        }

        #[test]
        fn shutdown_is_terminal_and_idempotent() {
            let session = session_with(Arc::new(StubProvider::new()));
            session.shutdown().unwrap();
            assert_eq!(session.state(), SessionState::Shutdown);

            session.shutdown().unwrap();
            assert_eq!(session.state(), SessionState::Shutdown);

            let err = session.restart().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }

        #[test]
        fn shutdown_queued_behind_act_stays_terminal() {
            for _ in 0..10 {
                let provider = Arc::new(StubProvider::with_delay(Duration::from_millis(10)));
                let session = Arc::new(session_with(Arc::clone(&provider)));

                let actor = {
                    let s = Arc::clone(&session);
                    std::thread::spawn(move || {
                        let _ = s.act(&click());
                    })
                };
                std::thread::sleep(Duration::from_millis(2));
                session.shutdown().unwrap();
                actor.join().unwrap();

                // The act thread's Busy -> Ready flip must not resurrect a
                // session that was shut down while it held the gate.
                assert_eq!(session.state(), SessionState::Shutdown);
            }
        }

        #[test]
        fn shutdown_releases_handle_even_when_provider_errors() {
            let provider = Arc::new(StubProvider::new());
            provider.fail_terminate.store(true, Ordering::SeqCst);
            let session = session_with(provider);

            session.shutdown().unwrap();
            assert_eq!(session.state(), SessionState::Shutdown);
        }
    }

    mod act {
        use super::*;

        #[test]
        fn returns_ack_and_clears_last_error() {
            let provider = Arc::new(StubProvider::new());
            let session = session_with(Arc::clone(&provider));

            // Seed a failure, then succeed.
            provider.fail_execute.store(true, Ordering::SeqCst);
            assert!(session.act(&click()).is_err());
            assert!(session.status().last_error.is_some());

            provider.fail_execute.store(false, Ordering::SeqCst);
            let result = session.act(&click()).unwrap();
            assert!(matches!(result, ActionResult::Ack { .. }));
            assert!(session.status().last_error.is_none());
        }

        #[test]
        fn failure_leaves_session_ready_with_error_recorded() {
            let provider = Arc::new(StubProvider::new());
            provider.fail_execute.store(true, Ordering::SeqCst);
            let session = session_with(provider);

            let err = session.act(&click()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Remote);
            assert_eq!(session.state(), SessionState::Ready);
            assert!(session.status().last_error.unwrap().contains("refused"));
        }

        #[test]
        fn terminal_session_fails_fast_without_touching_remote() {
            let provider = Arc::new(StubProvider::new());
            let session = session_with(Arc::clone(&provider));
            session.shutdown().unwrap();

            let calls_before = provider.calls.load(Ordering::SeqCst);
            let err = session.act(&click()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::SessionUnavailable);
            assert_eq!(provider.calls.load(Ordering::SeqCst), calls_before);
        }

        #[test]
        fn validation_failure_never_reaches_provider() {
            let provider = Arc::new(StubProvider::new());
            let session = session_with(Arc::clone(&provider));

            let bad = ActionRequest::Click {
                x: 9999,
                y: 0,
                button: crate::action::MouseButton::Left,
            };
            let err = session.act(&bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
            assert_eq!(session.state(), SessionState::Ready);
        }

        #[test]
        fn concurrent_acts_never_overlap() {
            let provider = Arc::new(StubProvider::with_delay(Duration::from_millis(5)));
            let session = Arc::new(session_with(Arc::clone(&provider)));

            let mut handles = Vec::new();
            for _ in 0..8 {
                let s = Arc::clone(&session);
                handles.push(std::thread::spawn(move || s.act(&click()).unwrap()));
            }
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(provider.calls.load(Ordering::SeqCst), 8);
            assert_eq!(provider.max_overlap.load(Ordering::SeqCst), 1);
            assert_eq!(session.state(), SessionState::Ready);
        }
    }

    mod wait {
        use super::*;

        #[test]
        fn wait_suspends_locally_without_provider_call() {
            let provider = Arc::new(StubProvider::new());
            let session = session_with(Arc::clone(&provider));

            let result = session.act(&ActionRequest::Wait { seconds: 0.01 }).unwrap();
            assert!(matches!(result, ActionResult::Ack { .. }));
            assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn cancelled_wait_surfaces_timeout_and_releases_gate() {
            let provider = Arc::new(StubProvider::new());
            let session = Arc::new(session_with(Arc::clone(&provider)));
            let cancel = CancelToken::new();

            let waiter = {
                let s = Arc::clone(&session);
                let c = cancel.clone();
                std::thread::spawn(move || {
                    s.act_with_cancel(&ActionRequest::Wait { seconds: 30.0 }, &c)
                })
            };

            std::thread::sleep(Duration::from_millis(20));
            let start = Instant::now();
            cancel.cancel();

            let err = waiter.join().unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Timeout);
            assert!(start.elapsed() < Duration::from_secs(5));

            // Gate released: a follow-up action succeeds immediately.
            session.act(&click()).unwrap();
            assert_eq!(session.state(), SessionState::Ready);
        }
    }
}

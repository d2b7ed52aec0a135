//! Caller-facing operations.
//!
//! [`DesktopService`] is the one entry point a transport layer needs: every
//! operation takes plain values, resolves the session through the registry,
//! and returns a typed payload or a typed error.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

use crate::action::{ActionRequest, ActionResult, MouseButton, ScrollDirection, ShellOutput};
use crate::agent::{AgentLoop, PromptRun};
use crate::cancel::CancelToken;
use crate::config::{BusyPolicy, DesktopConfig, ServiceConfig};
use crate::error::{Error, Result};
use crate::event_bus::{SessionEventBus, SessionEventKind};
use crate::model::ModelBridge;
use crate::provider::DesktopProvider;
use crate::session::{Session, SessionId, SessionRegistry, SessionState, SessionStatus};

/// Summary returned by [`DesktopService::server_info`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub active_sessions: usize,
}

/// The full operation surface over sessions, actions, and agent runs.
pub struct DesktopService {
    registry: Arc<SessionRegistry>,
    provider: Arc<dyn DesktopProvider>,
    bridge: Arc<dyn ModelBridge>,
    events: Arc<SessionEventBus>,
    config: ServiceConfig,
}

impl DesktopService {
    pub fn new(
        provider: Arc<dyn DesktopProvider>,
        bridge: Arc<dyn ModelBridge>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            provider,
            bridge,
            events: Arc::new(SessionEventBus::new()),
            config,
        }
    }

    /// Event bus carrying session lifecycle and run progress events.
    pub fn events(&self) -> &Arc<SessionEventBus> {
        &self.events
    }

    /// Provision a new desktop and register a session for it.
    pub fn initialize_computer(&self, desktop: DesktopConfig) -> Result<SessionStatus> {
        let session = Arc::new(Session::create(
            Arc::clone(&self.provider),
            desktop,
            self.config.log_dir.as_deref(),
        )?);
        let status = session.status();
        let id = self.registry.register(session);
        self.events.emit(&id, SessionEventKind::Created);
        Ok(status)
    }

    fn act(&self, id: &SessionId, request: ActionRequest) -> Result<ActionResult> {
        let session = self.registry.get(id)?;
        let result = session.act(&request);
        let kind = match &result {
            Ok(_) => SessionEventKind::ActionExecuted {
                action: request.describe(),
            },
            Err(err) => SessionEventKind::ActionFailed {
                action: request.describe(),
                message: err.to_string(),
            },
        };
        self.events.emit(id, kind);
        result
    }

    fn expect_ack(result: ActionResult) -> Result<String> {
        match result {
            ActionResult::Ack { detail } => Ok(detail),
            other => Err(Error::Remote(format!(
                "expected acknowledgement, got {:?}",
                other
            ))),
        }
    }

    /// Capture the screen and return the decoded PNG bytes.
    pub fn get_screenshot(&self, id: &SessionId) -> Result<Vec<u8>> {
        match self.act(id, ActionRequest::Screenshot)? {
            ActionResult::Image { base64 } => BASE64
                .decode(base64.as_bytes())
                .map_err(|e| Error::Remote(format!("screenshot was not valid base64: {}", e))),
            other => Err(Error::Remote(format!(
                "screenshot produced unexpected result: {:?}",
                other
            ))),
        }
    }

    pub fn left_click(&self, id: &SessionId, x: u32, y: u32) -> Result<String> {
        Self::expect_ack(self.act(
            id,
            ActionRequest::Click {
                x,
                y,
                button: MouseButton::Left,
            },
        )?)
    }

    pub fn right_click(&self, id: &SessionId, x: u32, y: u32) -> Result<String> {
        Self::expect_ack(self.act(
            id,
            ActionRequest::Click {
                x,
                y,
                button: MouseButton::Right,
            },
        )?)
    }

    pub fn double_click(&self, id: &SessionId, x: u32, y: u32) -> Result<String> {
        Self::expect_ack(self.act(id, ActionRequest::DoubleClick { x, y })?)
    }

    pub fn scroll(
        &self,
        id: &SessionId,
        direction: ScrollDirection,
        amount: u32,
    ) -> Result<String> {
        Self::expect_ack(self.act(id, ActionRequest::Scroll { direction, amount })?)
    }

    pub fn type_text(&self, id: &SessionId, text: &str) -> Result<String> {
        Self::expect_ack(self.act(
            id,
            ActionRequest::TypeText {
                text: text.to_string(),
                allow_empty: false,
            },
        )?)
    }

    pub fn press_key(&self, id: &SessionId, key: &str) -> Result<String> {
        Self::expect_ack(self.act(
            id,
            ActionRequest::PressKey {
                key: key.to_string(),
            },
        )?)
    }

    pub fn wait(&self, id: &SessionId, seconds: f64) -> Result<String> {
        Self::expect_ack(self.act(id, ActionRequest::Wait { seconds })?)
    }

    /// Run a bash command on the desktop.
    pub fn execute_bash(&self, id: &SessionId, command: &str) -> Result<ShellOutput> {
        match self.act(
            id,
            ActionRequest::ExecuteShell {
                command: command.to_string(),
            },
        )? {
            ActionResult::Shell {
                stdout,
                stderr,
                exit_code,
            } => Ok(ShellOutput {
                stdout,
                stderr,
                exit_code,
            }),
            other => Err(Error::Remote(format!(
                "shell execution produced unexpected result: {:?}",
                other
            ))),
        }
    }

    pub fn restart_computer(&self, id: &SessionId) -> Result<SessionStatus> {
        let session = self.registry.get(id)?;
        session.restart()?;
        self.events.emit(id, SessionEventKind::Restarted);
        Ok(session.status())
    }

    /// Shut the desktop down. Provider-side failures are tolerated; the
    /// handle is released regardless.
    ///
    /// The session stays registered in `Shutdown` state, so later actions
    /// against its id fail with `SessionUnavailable` rather than
    /// `NotFound`. Dispose of the id with [`DesktopService::remove_session`].
    pub fn shutdown_computer(&self, id: &SessionId) -> Result<()> {
        let session = self.registry.get(id)?;
        session.shutdown()?;
        self.events.emit(id, SessionEventKind::ShutDown);
        Ok(())
    }

    /// Drop a shut-down session from the registry and retire its id.
    pub fn remove_session(&self, id: &SessionId) -> Result<()> {
        self.registry.remove(id)
    }

    pub fn get_status(&self, id: &SessionId) -> Result<SessionStatus> {
        Ok(self.registry.get(id)?.status())
    }

    pub fn list_sessions(&self) -> Vec<(SessionId, SessionState)> {
        self.registry.list()
    }

    /// Run a natural-language instruction against a session's desktop.
    pub fn prompt(&self, id: &SessionId, instruction: &str) -> Result<PromptRun> {
        self.prompt_with_cancel(id, instruction, &CancelToken::new())
    }

    pub fn prompt_with_cancel(
        &self,
        id: &SessionId,
        instruction: &str,
        cancel: &CancelToken,
    ) -> Result<PromptRun> {
        if instruction.trim().is_empty() {
            return Err(Error::Validation("instruction must not be empty".to_string()));
        }
        let session = self.registry.get(id)?;
        if self.config.busy_policy == BusyPolicy::Reject && session.is_busy() {
            return Err(Error::SessionUnavailable(id.clone()));
        }

        let agent = AgentLoop::new(
            Arc::clone(&self.bridge),
            self.config.budget,
            Arc::clone(&self.events),
        );
        agent.run(&session, instruction, cancel)
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_sessions: self.registry.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{RunOutcome, Transcript};
    use crate::config::LoopBudget;
    use crate::error::ErrorKind;
    use crate::model::{ModelTurn, Observation};
    use crate::provider::DesktopHandle;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeDesktop {
        screenshots: AtomicU32,
    }

    impl FakeDesktop {
        fn new() -> Self {
            Self {
                screenshots: AtomicU32::new(0),
            }
        }
    }

    impl DesktopProvider for FakeDesktop {
        fn provision(&self, _config: &DesktopConfig) -> Result<DesktopHandle> {
            Ok(DesktopHandle {
                project_id: "proj".to_string(),
            })
        }

        fn execute(
            &self,
            _handle: &DesktopHandle,
            request: &ActionRequest,
        ) -> Result<ActionResult> {
            match request {
                ActionRequest::Screenshot => {
                    self.screenshots.fetch_add(1, Ordering::SeqCst);
                    // "png" in base64
                    Ok(ActionResult::Image {
                        base64: "cG5n".to_string(),
                    })
                }
                ActionRequest::ExecuteShell { command } => Ok(ActionResult::Shell {
                    stdout: format!("ran {}", command),
                    stderr: String::new(),
                    exit_code: 0,
                }),
                _ => Ok(ActionResult::Ack {
                    detail: request.describe(),
                }),
            }
        }

        fn restart(&self, _handle: &DesktopHandle) -> Result<()> {
            Ok(())
        }
        fn terminate(&self, _handle: &DesktopHandle) -> Result<()> {
            Ok(())
        }
        fn status(&self, _handle: &DesktopHandle) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"state": "running"}))
        }
    }

    struct AnswerBridge;

    impl ModelBridge for AnswerBridge {
        fn next_turn(
            &self,
            _instruction: &str,
            _transcript: &Transcript,
            _observation: &Observation,
        ) -> Result<ModelTurn> {
            Ok(ModelTurn::Answer {
                text: "task complete".to_string(),
            })
        }
    }

    fn service() -> DesktopService {
        service_with(ServiceConfig::default())
    }

    fn service_with(config: ServiceConfig) -> DesktopService {
        DesktopService::new(Arc::new(FakeDesktop::new()), Arc::new(AnswerBridge), config)
    }

    #[test]
    fn initialize_then_list_then_shutdown_then_remove() {
        let service = service();
        assert_eq!(service.server_info().active_sessions, 0);

        let status = service.initialize_computer(DesktopConfig::default()).unwrap();
        assert_eq!(status.state, SessionState::Ready);

        let sessions = service.list_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].0, status.id);

        // Shutdown is terminal but the id stays resolvable until removed.
        service.shutdown_computer(&status.id).unwrap();
        let sessions = service.list_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].1, SessionState::Shutdown);
        assert_eq!(
            service.get_status(&status.id).unwrap().state,
            SessionState::Shutdown
        );

        service.remove_session(&status.id).unwrap();
        assert!(service.list_sessions().is_empty());
        assert_eq!(
            service.get_status(&status.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn click_after_shutdown_is_session_unavailable() {
        let service = service();
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();

        service.left_click(&status.id, 100, 200).unwrap();
        service.shutdown_computer(&status.id).unwrap();

        let err = service.left_click(&status.id, 100, 200).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionUnavailable);
    }

    #[test]
    fn remove_refuses_a_live_session() {
        let service = service();
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();

        let err = service.remove_session(&status.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(service.list_sessions().len(), 1);
    }

    #[test]
    fn screenshot_returns_decoded_bytes() {
        let service = service();
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();

        let bytes = service.get_screenshot(&status.id).unwrap();
        assert_eq!(bytes, b"png");
    }

    #[test]
    fn input_operations_return_acknowledgements() {
        let service = service();
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();
        let id = &status.id;

        assert_eq!(service.left_click(id, 100, 200).unwrap(), "left-click at (100, 200)");
        assert!(service.double_click(id, 10, 10).unwrap().contains("double-click"));
        assert!(service
            .scroll(id, ScrollDirection::Down, 3)
            .unwrap()
            .contains("scroll down"));
        assert!(service.type_text(id, "hello").unwrap().contains("hello"));
        assert!(service.press_key(id, "Enter").unwrap().contains("Enter"));
        assert!(service.wait(id, 0.01).unwrap().contains("waited"));
    }

    #[test]
    fn execute_bash_returns_shell_output() {
        let service = service();
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();

        let output = service.execute_bash(&status.id, "date").unwrap();
        assert_eq!(output.stdout, "ran date");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn operations_on_unknown_session_are_not_found() {
        let service = service();
        let id = SessionId("missing".to_string());

        assert_eq!(service.left_click(&id, 0, 0).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(service.get_screenshot(&id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(service.prompt(&id, "hi").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn restart_reports_ready_status() {
        let service = service();
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();

        let after = service.restart_computer(&status.id).unwrap();
        assert_eq!(after.state, SessionState::Ready);
    }

    #[test]
    fn prompt_runs_to_an_answer() {
        let service = service();
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();

        let run = service.prompt(&status.id, "what is on screen?").unwrap();
        assert_eq!(run.outcome, RunOutcome::Answered);
        assert_eq!(run.answer.as_deref(), Some("task complete"));
        assert_eq!(run.turns_used, 1);
    }

    #[test]
    fn empty_instruction_is_rejected() {
        let service = service();
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();

        let err = service.prompt(&status.id, "   ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn reject_policy_refuses_busy_session() {
        let service = Arc::new(service_with(ServiceConfig {
            busy_policy: BusyPolicy::Reject,
            budget: LoopBudget::default(),
            log_dir: None,
        }));
        let status = service.initialize_computer(DesktopConfig::default()).unwrap();
        let id = status.id.clone();

        let waiter = {
            let service = Arc::clone(&service);
            let id = id.clone();
            std::thread::spawn(move || service.wait(&id, 0.3))
        };
        // Let the wait occupy the gate.
        std::thread::sleep(std::time::Duration::from_millis(50));

        let err = service.prompt(&id, "do something").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionUnavailable);

        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn session_events_are_observable() {
        let service = service();
        let mut rx = service.events().subscribe();

        let status = service.initialize_computer(DesktopConfig::default()).unwrap();
        service.left_click(&status.id, 1, 1).unwrap();
        service.shutdown_computer(&status.id).unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(format!("{:?}", event.kind));
        }
        assert!(kinds.iter().any(|k| k.contains("Created")));
        assert!(kinds.iter().any(|k| k.contains("ActionExecuted")));
        assert!(kinds.iter().any(|k| k.contains("ShutDown")));
    }

    #[test]
    fn server_info_names_the_crate() {
        let service = service();
        let info = service.server_info();
        assert_eq!(info.name, "vdesk-core");
        assert!(!info.version.is_empty());
    }
}

//! HTTP desktop provider.
//!
//! Talks to a desktop provider's REST API with blocking JSON calls and a
//! per-call deadline. Endpoint shape:
//!
//! - `POST   {base}/v1/computers`                  — provision
//! - `POST   {base}/v1/computers/{id}/actions`     — execute one action
//! - `POST   {base}/v1/computers/{id}/restart`     — restart
//! - `POST   {base}/v1/computers/{id}/shutdown`    — terminate
//! - `GET    {base}/v1/computers/{id}/status`      — status

use std::time::Duration;

use serde::Deserialize;

use crate::action::{ActionRequest, ActionResult};
use crate::config::DesktopConfig;
use crate::error::{Error, Result};

use super::{DesktopHandle, DesktopProvider};

/// Configuration for [`HttpDesktopProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Base API URL, without a trailing slash.
    pub base_url: String,

    /// Bearer token sent with every request, if the provider requires one.
    pub api_key: Option<String>,

    /// Deadline for ordinary calls (provision, input actions, screenshot).
    pub timeout: Duration,

    /// Deadline for shell execution, which legitimately runs longer.
    pub shell_timeout: Duration,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8800".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            shell_timeout: Duration::from_secs(120),
        }
    }
}

/// Blocking JSON client for a remote desktop provider.
pub struct HttpDesktopProvider {
    agent: ureq::Agent,
    shell_agent: ureq::Agent,
    config: HttpProviderConfig,
}

#[derive(Deserialize)]
struct ProvisionResponse {
    project_id: String,
}

impl HttpDesktopProvider {
    pub fn new(config: HttpProviderConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        let shell_agent = ureq::AgentBuilder::new()
            .timeout(config.shell_timeout)
            .build();
        Self {
            agent,
            shell_agent,
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/computers{}", self.config.base_url, path)
    }

    fn request(&self, agent: &ureq::Agent, method: &str, url: &str) -> ureq::Request {
        let mut req = agent.request(method, url);
        if let Some(ref key) = self.config.api_key {
            req = req.set("Authorization", &format!("Bearer {}", key));
        }
        req
    }

    fn map_error(operation: &str, err: ureq::Error) -> Error {
        match err {
            ureq::Error::Status(code, response) => {
                let body = response.into_string().unwrap_or_default();
                Error::Remote(format!("{} failed with HTTP {}: {}", operation, code, body))
            }
            ureq::Error::Transport(transport) => {
                let detail = transport.to_string();
                if is_timeout(&transport) {
                    Error::Timeout {
                        operation: operation.to_string(),
                        detail,
                    }
                } else {
                    Error::Remote(format!("{} transport failure: {}", operation, detail))
                }
            }
        }
    }

    fn parse_json(operation: &str, response: ureq::Response) -> Result<serde_json::Value> {
        response
            .into_json()
            .map_err(|e| Error::Remote(format!("{} returned invalid JSON: {}", operation, e)))
    }
}

/// Whether a transport failure was a deadline overrun, judged by the
/// underlying `io::Error` kind. Read timeouts surface as `WouldBlock` on
/// some platforms. Falls back to the message when the io source is not
/// exposed.
fn is_timeout(transport: &ureq::Transport) -> bool {
    if transport.kind() != ureq::ErrorKind::Io {
        return false;
    }
    match std::error::Error::source(transport)
        .and_then(|source| source.downcast_ref::<std::io::Error>())
    {
        Some(io) => matches!(
            io.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        ),
        None => transport.to_string().contains("timed out"),
    }
}

/// Build the provider-side JSON body for one action.
///
/// `Wait` is deliberately unsupported here: the session suspends locally and
/// never forwards it.
fn action_body(request: &ActionRequest) -> Result<serde_json::Value> {
    let body = match request {
        ActionRequest::Click { x, y, button } => serde_json::json!({
            "type": "click", "x": x, "y": y, "button": button,
        }),
        ActionRequest::DoubleClick { x, y } => serde_json::json!({
            "type": "double_click", "x": x, "y": y,
        }),
        ActionRequest::Scroll { direction, amount } => serde_json::json!({
            "type": "scroll", "direction": direction, "amount": amount,
        }),
        ActionRequest::TypeText { text, .. } => serde_json::json!({
            "type": "type", "text": text,
        }),
        ActionRequest::PressKey { key } => serde_json::json!({
            "type": "key", "key": key,
        }),
        ActionRequest::Screenshot => serde_json::json!({ "type": "screenshot" }),
        ActionRequest::ExecuteShell { command } => serde_json::json!({
            "type": "exec", "command": command,
        }),
        ActionRequest::Wait { .. } => {
            return Err(Error::Validation(
                "wait is handled locally, not by the provider".to_string(),
            ))
        }
    };
    Ok(body)
}

/// Translate the provider's action response into a typed result.
fn parse_action_result(request: &ActionRequest, body: serde_json::Value) -> Result<ActionResult> {
    match request {
        ActionRequest::Screenshot => {
            let image = body
                .get("image")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Remote("screenshot response missing image".to_string()))?;
            Ok(ActionResult::Image {
                base64: image.to_string(),
            })
        }
        ActionRequest::ExecuteShell { .. } => {
            let stdout = body
                .get("stdout")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let stderr = body
                .get("stderr")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let exit_code = body
                .get("exit_code")
                .and_then(|v| v.as_i64())
                .unwrap_or(0) as i32;
            Ok(ActionResult::Shell {
                stdout,
                stderr,
                exit_code,
            })
        }
        _ => Ok(ActionResult::Ack {
            detail: request.describe(),
        }),
    }
}

impl DesktopProvider for HttpDesktopProvider {
    fn provision(&self, config: &DesktopConfig) -> Result<DesktopHandle> {
        let url = self.url("");
        let response = self
            .request(&self.agent, "POST", &url)
            .send_json(serde_json::to_value(config).map_err(|e| Error::Remote(e.to_string()))?)
            .map_err(|e| Self::map_error("provision", e))?;

        let parsed: ProvisionResponse = response
            .into_json()
            .map_err(|e| Error::Remote(format!("provision returned invalid JSON: {}", e)))?;

        log::info!("provisioned desktop {}", parsed.project_id);
        Ok(DesktopHandle {
            project_id: parsed.project_id,
        })
    }

    fn execute(&self, handle: &DesktopHandle, request: &ActionRequest) -> Result<ActionResult> {
        let body = action_body(request)?;
        let url = self.url(&format!("/{}/actions", handle.project_id));
        let agent = if matches!(request, ActionRequest::ExecuteShell { .. }) {
            &self.shell_agent
        } else {
            &self.agent
        };

        let operation = request.describe();
        let response = self
            .request(agent, "POST", &url)
            .send_json(body)
            .map_err(|e| Self::map_error(&operation, e))?;

        let json = Self::parse_json(&operation, response)?;
        parse_action_result(request, json)
    }

    fn restart(&self, handle: &DesktopHandle) -> Result<()> {
        let url = self.url(&format!("/{}/restart", handle.project_id));
        self.request(&self.agent, "POST", &url)
            .send_json(serde_json::json!({}))
            .map_err(|e| Self::map_error("restart", e))?;
        Ok(())
    }

    fn terminate(&self, handle: &DesktopHandle) -> Result<()> {
        let url = self.url(&format!("/{}/shutdown", handle.project_id));
        self.request(&self.agent, "POST", &url)
            .send_json(serde_json::json!({}))
            .map_err(|e| Self::map_error("shutdown", e))?;
        Ok(())
    }

    fn status(&self, handle: &DesktopHandle) -> Result<serde_json::Value> {
        let url = self.url(&format!("/{}/status", handle.project_id));
        let response = self
            .request(&self.agent, "GET", &url)
            .call()
            .map_err(|e| Self::map_error("status", e))?;
        Self::parse_json("status", response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{MouseButton, ScrollDirection};
    use serde_json::json;

    mod action_bodies {
        use super::*;

        #[test]
        fn click_carries_coordinates_and_button() {
            let body = action_body(&ActionRequest::Click {
                x: 10,
                y: 20,
                button: MouseButton::Right,
            })
            .unwrap();
            assert_eq!(body["type"], "click");
            assert_eq!(body["x"], 10);
            assert_eq!(body["y"], 20);
            assert_eq!(body["button"], "right");
        }

        #[test]
        fn scroll_serializes_direction_lowercase() {
            let body = action_body(&ActionRequest::Scroll {
                direction: ScrollDirection::Down,
                amount: 3,
            })
            .unwrap();
            assert_eq!(body["direction"], "down");
            assert_eq!(body["amount"], 3);
        }

        #[test]
        fn exec_carries_command() {
            let body = action_body(&ActionRequest::ExecuteShell {
                command: "date".to_string(),
            })
            .unwrap();
            assert_eq!(body["type"], "exec");
            assert_eq!(body["command"], "date");
        }

        #[test]
        fn wait_is_rejected() {
            let err = action_body(&ActionRequest::Wait { seconds: 1.0 }).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        }
    }

    mod action_results {
        use super::*;

        #[test]
        fn screenshot_response_becomes_image() {
            let result = parse_action_result(
                &ActionRequest::Screenshot,
                json!({"image": "aGVsbG8="}),
            )
            .unwrap();
            match result {
                ActionResult::Image { base64 } => assert_eq!(base64, "aGVsbG8="),
                _ => panic!("expected Image"),
            }
        }

        #[test]
        fn screenshot_without_image_is_remote_error() {
            let err =
                parse_action_result(&ActionRequest::Screenshot, json!({})).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Remote);
        }

        #[test]
        fn shell_response_maps_fields() {
            let request = ActionRequest::ExecuteShell {
                command: "date".to_string(),
            };
            let result = parse_action_result(
                &request,
                json!({"stdout": "Mon", "stderr": "", "exit_code": 0}),
            )
            .unwrap();
            match result {
                ActionResult::Shell {
                    stdout, exit_code, ..
                } => {
                    assert_eq!(stdout, "Mon");
                    assert_eq!(exit_code, 0);
                }
                _ => panic!("expected Shell"),
            }
        }

        #[test]
        fn shell_response_tolerates_missing_fields() {
            let request = ActionRequest::ExecuteShell {
                command: "true".to_string(),
            };
            let result = parse_action_result(&request, json!({})).unwrap();
            match result {
                ActionResult::Shell {
                    stdout,
                    stderr,
                    exit_code,
                } => {
                    assert!(stdout.is_empty());
                    assert!(stderr.is_empty());
                    assert_eq!(exit_code, 0);
                }
                _ => panic!("expected Shell"),
            }
        }

        #[test]
        fn input_action_becomes_ack() {
            let request = ActionRequest::PressKey {
                key: "Enter".to_string(),
            };
            let result = parse_action_result(&request, json!({"ok": true})).unwrap();
            match result {
                ActionResult::Ack { detail } => assert!(detail.contains("Enter")),
                _ => panic!("expected Ack"),
            }
        }
    }

    mod error_mapping {
        use super::*;
        use std::net::TcpListener;

        fn handle() -> DesktopHandle {
            DesktopHandle {
                project_id: "p1".to_string(),
            }
        }

        #[test]
        fn stalled_server_maps_to_timeout() {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            // Accept connections but never answer.
            std::thread::spawn(move || {
                let mut held = Vec::new();
                while let Ok((stream, _)) = listener.accept() {
                    held.push(stream);
                }
            });

            let provider = HttpDesktopProvider::new(HttpProviderConfig {
                base_url: format!("http://{}", addr),
                timeout: Duration::from_millis(100),
                ..HttpProviderConfig::default()
            });

            let err = provider.status(&handle()).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
        }

        #[test]
        fn refused_connection_maps_to_remote() {
            // Bind and drop to find a port with nothing listening.
            let addr = TcpListener::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap();

            let provider = HttpDesktopProvider::new(HttpProviderConfig {
                base_url: format!("http://{}", addr),
                timeout: Duration::from_secs(2),
                ..HttpProviderConfig::default()
            });

            let err = provider.status(&handle()).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Remote);
        }
    }

    mod urls {
        use super::*;

        #[test]
        fn url_builds_under_computers_namespace() {
            let provider = HttpDesktopProvider::new(HttpProviderConfig {
                base_url: "https://api.example.com".to_string(),
                ..HttpProviderConfig::default()
            });
            assert_eq!(
                provider.url("/abc/actions"),
                "https://api.example.com/v1/computers/abc/actions"
            );
        }
    }
}

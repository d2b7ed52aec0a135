//! The action contract: every primitive a virtual desktop accepts, plus the
//! typed results those primitives produce.
//!
//! `ActionRequest` is a closed set. Adding a new primitive is a variant
//! addition with exhaustive matching everywhere, never a dynamic lookup.

use serde::{Deserialize, Serialize};

use crate::config::DesktopConfig;
use crate::error::{Error, ErrorKind, Result};

/// Mouse button for click actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Scroll direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Longest accepted `Wait` duration, in seconds.
pub const MAX_WAIT_SECONDS: f64 = 60.0;

/// Largest accepted scroll amount per request.
pub const MAX_SCROLL_AMOUNT: u32 = 20;

/// One primitive input or observation operation against a desktop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActionRequest {
    Click {
        x: u32,
        y: u32,
        button: MouseButton,
    },
    DoubleClick {
        x: u32,
        y: u32,
    },
    Scroll {
        direction: ScrollDirection,
        amount: u32,
    },
    TypeText {
        text: String,
        /// Empty text is rejected unless explicitly allowed.
        #[serde(default)]
        allow_empty: bool,
    },
    PressKey {
        key: String,
    },
    Screenshot,
    ExecuteShell {
        command: String,
    },
    Wait {
        seconds: f64,
    },
}

impl ActionRequest {
    /// Validate parameters before dispatch. Coordinates must fall inside the
    /// configured display; text, keys and commands must be meaningful.
    pub fn validate(&self, config: &DesktopConfig) -> Result<()> {
        match self {
            ActionRequest::Click { x, y, .. } | ActionRequest::DoubleClick { x, y } => {
                if *x >= config.display_width || *y >= config.display_height {
                    return Err(Error::Validation(format!(
                        "coordinates ({}, {}) outside {}x{} display",
                        x, y, config.display_width, config.display_height
                    )));
                }
                Ok(())
            }
            ActionRequest::Scroll { amount, .. } => {
                if *amount == 0 || *amount > MAX_SCROLL_AMOUNT {
                    return Err(Error::Validation(format!(
                        "scroll amount {} outside 1..={}",
                        amount, MAX_SCROLL_AMOUNT
                    )));
                }
                Ok(())
            }
            ActionRequest::TypeText { text, allow_empty } => {
                if text.is_empty() && !allow_empty {
                    return Err(Error::Validation("text must not be empty".to_string()));
                }
                Ok(())
            }
            ActionRequest::PressKey { key } => {
                if key.trim().is_empty() {
                    return Err(Error::Validation("key must not be empty".to_string()));
                }
                Ok(())
            }
            ActionRequest::Screenshot => Ok(()),
            ActionRequest::ExecuteShell { command } => {
                if command.trim().is_empty() {
                    return Err(Error::Validation("command must not be empty".to_string()));
                }
                Ok(())
            }
            ActionRequest::Wait { seconds } => {
                if !seconds.is_finite() || *seconds <= 0.0 || *seconds > MAX_WAIT_SECONDS {
                    return Err(Error::Validation(format!(
                        "wait of {}s outside (0, {}]",
                        seconds, MAX_WAIT_SECONDS
                    )));
                }
                Ok(())
            }
        }
    }

    /// Whether retrying this action is safe. Input-injecting actions may
    /// double-submit; only observations and waits may be retried.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, ActionRequest::Screenshot | ActionRequest::Wait { .. })
    }

    /// Whether this action can change what is on screen. Drives the agent
    /// loop's screenshot-refresh rule.
    pub fn mutates_screen(&self) -> bool {
        !matches!(self, ActionRequest::Screenshot | ActionRequest::Wait { .. })
    }

    /// Short human-readable description, used for acknowledgements, logs,
    /// and failure observations fed back to the model.
    pub fn describe(&self) -> String {
        match self {
            ActionRequest::Click {
                x,
                y,
                button: MouseButton::Left,
            } => format!("left-click at ({}, {})", x, y),
            ActionRequest::Click {
                x,
                y,
                button: MouseButton::Right,
            } => format!("right-click at ({}, {})", x, y),
            ActionRequest::Click {
                x,
                y,
                button: MouseButton::Middle,
            } => format!("middle-click at ({}, {})", x, y),
            ActionRequest::DoubleClick { x, y } => format!("double-click at ({}, {})", x, y),
            ActionRequest::Scroll { direction, amount } => {
                format!("scroll {:?} by {}", direction, amount).to_lowercase()
            }
            ActionRequest::TypeText { text, .. } => {
                let preview: String = text.chars().take(50).collect();
                if text.chars().count() > 50 {
                    format!("type \"{}...\"", preview)
                } else {
                    format!("type \"{}\"", preview)
                }
            }
            ActionRequest::PressKey { key } => format!("press key {}", key),
            ActionRequest::Screenshot => "take screenshot".to_string(),
            ActionRequest::ExecuteShell { command } => {
                let preview: String = command.chars().take(80).collect();
                format!("execute `{}`", preview)
            }
            ActionRequest::Wait { seconds } => format!("wait {}s", seconds),
        }
    }
}

/// Output of a shell execution on the remote desktop, passed through
/// without local interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Success payload of one executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ActionResult {
    /// Acknowledgement for input actions.
    Ack { detail: String },
    /// Screenshot image, base64-encoded PNG.
    Image { base64: String },
    /// Shell execution output.
    Shell {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },
}

/// Serializable record of one action's outcome, kept in transcripts and
/// session bookkeeping instead of the raw `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ActionOutcome {
    Ok { result: ActionResult },
    Failed { kind: ErrorKind, message: String },
}

impl ActionOutcome {
    pub fn from_result(result: &Result<ActionResult>) -> Self {
        match result {
            Ok(r) => ActionOutcome::Ok { result: r.clone() },
            Err(e) => ActionOutcome::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ActionOutcome::Failed { .. })
    }
}

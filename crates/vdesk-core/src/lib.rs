//! # vdesk-core
//!
//! Core logic for vdesk, a virtual-desktop session registry with an
//! agentic control loop: a vision-capable model perceives the screen,
//! requests input actions, and iterates until the task is answered.
//!
//! This crate is transport-agnostic and can sit behind:
//! - An MCP server exposing each operation as a tool
//! - A REST/WebSocket server
//! - A CLI
//!
//! ## Key Concepts
//!
//! - **Session**: one exclusively-owned remote desktop with serialized
//!   action access and a lifecycle state machine
//! - **ActionRequest**: the closed set of desktop primitives
//! - **AgentLoop**: the bounded perceive-act loop over a session
//! - **Transcript**: the per-run record handed back to the caller

pub mod action;
pub mod agent;
pub mod cancel;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod logging;
pub mod model;
pub mod ops;
pub mod provider;
pub mod session;

// Re-export commonly used types
pub use action::{ActionRequest, ActionResult, MouseButton, ScrollDirection, ShellOutput};
pub use agent::{AgentLoop, PromptRun, RunOutcome, Transcript};
pub use cancel::CancelToken;
pub use config::{BusyPolicy, DesktopConfig, LoopBudget, ModelConfig, ServiceConfig};
pub use error::{Error, ErrorKind, Result};
pub use event_bus::{SessionEvent, SessionEventBus, SessionEventKind};
pub use model::{AnthropicBridge, ModelBridge, ModelTurn, Observation};
pub use ops::{DesktopService, ServerInfo};
pub use provider::{DesktopProvider, HttpDesktopProvider, HttpProviderConfig};
pub use session::{Session, SessionId, SessionRegistry, SessionState, SessionStatus};

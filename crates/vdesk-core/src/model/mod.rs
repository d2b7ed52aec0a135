//! The model bridge: turning an instruction, a transcript, and the latest
//! observation into the model's next move.

pub mod anthropic;
pub mod parser;
pub mod types;

pub use anthropic::AnthropicBridge;

use crate::action::ActionRequest;
use crate::agent::transcript::Transcript;
use crate::error::Result;

/// What the model most recently got to see.
#[derive(Debug, Clone)]
pub enum Observation {
    /// A fresh screenshot, base64-encoded PNG.
    Screen { base64: String },
    /// The previous batch stopped at a failed action; this is the model's
    /// one self-correction opportunity.
    ActionFailure { action: String, message: String },
}

/// One action the model asked for, keyed by its `tool_use` id.
#[derive(Debug, Clone)]
pub struct RequestedAction {
    pub tool_use_id: String,
    pub request: ActionRequest,
}

/// The model's next move.
#[derive(Debug, Clone)]
pub enum ModelTurn {
    /// The task is done; this text goes back to the caller.
    Answer { text: String },
    /// Execute these actions in order, then come back with what happened.
    ActionBatch {
        reasoning: Option<String>,
        requests: Vec<RequestedAction>,
    },
}

/// The seam between the agent loop and a concrete model provider.
///
/// Implementations do exactly one model round-trip per call and never retry:
/// the loop decides what a failure means. `ModelProtocol` for replies that
/// cannot be interpreted, `ModelUnavailable` for transport and auth
/// failures.
pub trait ModelBridge: Send + Sync {
    fn next_turn(
        &self,
        instruction: &str,
        transcript: &Transcript,
        observation: &Observation,
    ) -> Result<ModelTurn>;
}

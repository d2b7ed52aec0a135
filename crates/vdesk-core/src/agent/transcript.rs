//! The run transcript: an ordered record of every model turn and every
//! action executed during one agent run.
//!
//! Transcripts are owned by the run and returned to the caller; the core
//! keeps no process-wide history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::{ActionOutcome, ActionRequest};

/// One action requested by the model and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// The model's `tool_use` id, kept so the next request can correlate
    /// results back to the tool call that produced them.
    pub tool_use_id: String,
    pub request: ActionRequest,
    pub outcome: ActionOutcome,
}

/// One model turn: what the model said, what it asked for, and what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    /// Freeform reasoning text the model emitted alongside its tool calls.
    pub reasoning: Option<String>,

    /// Final answer text, present only on the run's closing turn.
    pub answer: Option<String>,

    /// Actions executed this turn, in model order. Stops at the first
    /// failure, so a failed action is always last.
    pub actions: Vec<ActionRecord>,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl TurnRecord {
    /// Whether this turn's batch ended in a failed action.
    pub fn ended_in_failure(&self) -> bool {
        self.actions
            .last()
            .map(|a| a.outcome.is_failure())
            .unwrap_or(false)
    }
}

/// Ordered history of one run's turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<TurnRecord>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: TurnRecord) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&TurnRecord> {
        self.turns.last()
    }
}

/// How a run ended. Budget exhaustion and cancellation are defined outcomes,
/// not errors; both carry the partial transcript back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOutcome {
    /// The model produced a final textual answer.
    Answered,
    /// The turn or wall-clock ceiling was reached first.
    BudgetExceeded,
    /// The caller cancelled the run.
    Cancelled,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunOutcome::Answered => "answered",
            RunOutcome::BudgetExceeded => "budgetExceeded",
            RunOutcome::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Everything a completed run hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRun {
    pub outcome: RunOutcome,
    /// Present iff `outcome` is `Answered`.
    pub answer: Option<String>,
    pub transcript: Transcript,
    pub turns_used: u32,
}

//! The agent loop and its transcript.

pub mod runner;
pub mod transcript;

pub use runner::AgentLoop;
pub use transcript::{ActionRecord, PromptRun, RunOutcome, Transcript, TurnRecord};

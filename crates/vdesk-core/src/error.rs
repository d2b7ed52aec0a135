//! Crate-wide error taxonomy.
//!
//! Every fallible operation in vdesk-core returns one of these kinds.
//! Callers can branch on [`Error::kind`] without parsing messages.
//! Note that budget exhaustion of an agent run is *not* an error; it is a
//! defined terminal outcome (see `agent::RunOutcome`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::state::{SessionId, SessionState};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The session id is unknown (never existed, or already disposed).
    #[error("no session found for id {0}")]
    NotFound(SessionId),

    /// The operation is not valid for the session's current state.
    #[error("{operation} is not valid while the session is {state}")]
    InvalidState {
        operation: String,
        state: SessionState,
    },

    /// The session is terminal; its gate can no longer be satisfied.
    #[error("session {0} is no longer available")]
    SessionUnavailable(SessionId),

    /// An action request failed parameter validation before dispatch.
    #[error("invalid action request: {0}")]
    Validation(String),

    /// The remote desktop provider failed to provision or execute.
    #[error("remote desktop error: {0}")]
    Remote(String),

    /// A bounded call exceeded its deadline.
    #[error("{operation} timed out: {detail}")]
    Timeout { operation: String, detail: String },

    /// The model reply could not be parsed into an answer or a tool batch.
    #[error("unparseable model reply: {0}")]
    ModelProtocol(String),

    /// The model provider could not be reached or rejected the request.
    #[error("model provider unavailable: {0}")]
    ModelUnavailable(String),
}

/// Discriminant of [`Error`], used for recording failures in transcripts
/// and for the agent loop's "same kind twice in a row" abort rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    SessionUnavailable,
    Validation,
    Remote,
    Timeout,
    ModelProtocol,
    ModelUnavailable,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::SessionUnavailable(_) => ErrorKind::SessionUnavailable,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Remote(_) => ErrorKind::Remote,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::ModelProtocol(_) => ErrorKind::ModelProtocol,
            Error::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
        }
    }
}

//! The perceive-act loop driving one instruction to completion.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::action::{ActionOutcome, ActionRequest, ActionResult};
use crate::cancel::CancelToken;
use crate::config::LoopBudget;
use crate::error::{Error, ErrorKind, Result};
use crate::event_bus::{SessionEventBus, SessionEventKind};
use crate::model::{ModelBridge, ModelTurn, Observation};
use crate::session::Session;

use super::transcript::{ActionRecord, PromptRun, RunOutcome, Transcript, TurnRecord};

/// Bounded agent loop over one session.
///
/// Within one run there is never more than one model call or one action in
/// flight; runs against different sessions proceed fully in parallel.
pub struct AgentLoop {
    bridge: Arc<dyn ModelBridge>,
    budget: LoopBudget,
    events: Arc<SessionEventBus>,
}

impl AgentLoop {
    pub fn new(
        bridge: Arc<dyn ModelBridge>,
        budget: LoopBudget,
        events: Arc<SessionEventBus>,
    ) -> Self {
        Self {
            bridge,
            budget,
            events,
        }
    }

    /// Drive `instruction` against `session` until the model answers, the
    /// budget runs out, or the caller cancels.
    ///
    /// Budget exhaustion and cancellation are outcomes carrying the partial
    /// transcript. Errors abort the run: an unparseable or unreachable
    /// model, or a second consecutive action failure of the same kind after
    /// the model was already given one chance to correct itself.
    pub fn run(
        &self,
        session: &Session,
        instruction: &str,
        cancel: &CancelToken,
    ) -> Result<PromptRun> {
        let started = Instant::now();
        let mut transcript = Transcript::new();

        self.events.emit(
            session.id(),
            SessionEventKind::RunStarted {
                instruction: instruction.to_string(),
            },
        );

        if cancel.is_cancelled() {
            return Ok(self.finish(session, RunOutcome::Cancelled, None, transcript));
        }

        // The model always starts from a real view of the screen.
        let mut observation = Observation::Screen {
            base64: self.take_screenshot(session, cancel)?,
        };
        let mut last_failure_kind: Option<ErrorKind> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(self.finish(session, RunOutcome::Cancelled, None, transcript));
            }
            if transcript.len() as u32 >= self.budget.max_turns
                || started.elapsed() >= self.budget.max_duration
            {
                return Ok(self.finish(session, RunOutcome::BudgetExceeded, None, transcript));
            }

            let turn_started = Utc::now();
            let turn = self
                .bridge
                .next_turn(instruction, &transcript, &observation)?;

            match turn {
                ModelTurn::Answer { text } => {
                    transcript.push(TurnRecord {
                        reasoning: None,
                        answer: Some(text.clone()),
                        actions: Vec::new(),
                        started_at: turn_started,
                        completed_at: Utc::now(),
                    });
                    self.emit_turn(session, &transcript);
                    return Ok(self.finish(session, RunOutcome::Answered, Some(text), transcript));
                }
                ModelTurn::ActionBatch {
                    reasoning,
                    requests,
                } => {
                    let mut records: Vec<ActionRecord> = Vec::new();
                    let mut failure: Option<Error> = None;
                    let mut latest_image: Option<String> = None;
                    let mut mutated = false;

                    for requested in &requests {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let result = session.act_with_cancel(&requested.request, cancel);
                        match &result {
                            Ok(ActionResult::Image { base64 }) => {
                                latest_image = Some(base64.clone())
                            }
                            Ok(_) => mutated |= requested.request.mutates_screen(),
                            Err(_) => {}
                        }
                        self.emit_action(session, &requested.request, &result);
                        records.push(ActionRecord {
                            tool_use_id: requested.tool_use_id.clone(),
                            request: requested.request.clone(),
                            outcome: ActionOutcome::from_result(&result),
                        });
                        if let Err(err) = result {
                            failure = Some(err);
                            break;
                        }
                    }

                    transcript.push(TurnRecord {
                        reasoning,
                        answer: None,
                        actions: records,
                        started_at: turn_started,
                        completed_at: Utc::now(),
                    });
                    self.emit_turn(session, &transcript);

                    if let Some(err) = failure {
                        let failed_request = transcript
                            .last()
                            .and_then(|t| t.actions.last())
                            .map(|a| a.request.clone())
                            .unwrap_or(ActionRequest::Screenshot);
                        observation =
                            self.feed_back_failure(&failed_request, err, &mut last_failure_kind)?;
                        continue;
                    }

                    last_failure_kind = None;

                    // Clean mutating batch: the model's picture is stale,
                    // refresh it. A refresh failure gets the same one-shot
                    // feedback treatment as any other action failure.
                    if mutated {
                        match self.take_screenshot(session, cancel) {
                            Ok(base64) => observation = Observation::Screen { base64 },
                            Err(err) => {
                                observation = self.feed_back_failure(
                                    &ActionRequest::Screenshot,
                                    err,
                                    &mut last_failure_kind,
                                )?;
                            }
                        }
                    } else if let Some(base64) = latest_image {
                        observation = Observation::Screen { base64 };
                    }
                }
            }
        }
    }

    /// One self-correction opportunity: the first failure becomes the next
    /// observation; a second consecutive failure of the same kind aborts.
    fn feed_back_failure(
        &self,
        request: &ActionRequest,
        err: Error,
        last_failure_kind: &mut Option<ErrorKind>,
    ) -> Result<Observation> {
        if *last_failure_kind == Some(err.kind()) {
            log::warn!("aborting run after repeated {:?} failures", err.kind());
            return Err(err);
        }
        *last_failure_kind = Some(err.kind());
        Ok(Observation::ActionFailure {
            action: request.describe(),
            message: err.to_string(),
        })
    }

    fn take_screenshot(&self, session: &Session, cancel: &CancelToken) -> Result<String> {
        match session.act_with_cancel(&ActionRequest::Screenshot, cancel)? {
            ActionResult::Image { base64 } => Ok(base64),
            other => Err(Error::Remote(format!(
                "screenshot produced unexpected result: {:?}",
                other
            ))),
        }
    }

    fn emit_action(
        &self,
        session: &Session,
        request: &ActionRequest,
        result: &Result<ActionResult>,
    ) {
        let kind = match result {
            Ok(_) => SessionEventKind::ActionExecuted {
                action: request.describe(),
            },
            Err(err) => SessionEventKind::ActionFailed {
                action: request.describe(),
                message: err.to_string(),
            },
        };
        self.events.emit(session.id(), kind);
    }

    fn emit_turn(&self, session: &Session, transcript: &Transcript) {
        self.events.emit(
            session.id(),
            SessionEventKind::TurnCompleted {
                turn: transcript.len() as u32,
            },
        );
    }

    fn finish(
        &self,
        session: &Session,
        outcome: RunOutcome,
        answer: Option<String>,
        transcript: Transcript,
    ) -> PromptRun {
        self.events.emit(
            session.id(),
            SessionEventKind::RunFinished {
                outcome: outcome.to_string(),
            },
        );
        let turns_used = transcript.len() as u32;
        PromptRun {
            outcome,
            answer,
            transcript,
            turns_used,
        }
    }
}

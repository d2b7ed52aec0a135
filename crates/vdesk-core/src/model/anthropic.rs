//! Anthropic Messages API implementation of [`ModelBridge`].
//!
//! One blocking round-trip per turn. The conversation is rebuilt from the
//! transcript on every call: each prior turn becomes an assistant message of
//! `tool_use` blocks followed by a user message of `tool_result` blocks.
//! Only the latest observation carries an actual image; earlier screenshots
//! are replayed as text placeholders to keep request sizes bounded.

use crate::action::{ActionOutcome, ActionResult};
use crate::agent::transcript::Transcript;
use crate::config::ModelConfig;
use crate::error::{Error, Result};

use super::parser::{encode_tool_use, parse_response, tool_definitions};
use super::types::{
    ContentBlock, ImageSource, Message, MessagesRequest, MessagesResponse, Role, ThinkingConfig,
};
use super::{ModelBridge, ModelTurn, Observation};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const THINKING_BUDGET_TOKENS: u32 = 1024;

/// System prompt establishing the desktop environment and its conventions.
const DESKTOP_GUIDELINES: &str = "\
You are operating an Ubuntu virtual desktop through a set of tools.

Desktop conventions:
- ALWAYS double-click to open applications and files on the desktop; \
single-click for menu items, taskbar icons, and window controls.
- Useful shortcuts: Alt+Tab switches windows, Ctrl+Alt+T opens a terminal, \
Alt+F4 closes the current window, Ctrl+C/Ctrl+V copy and paste.
- Take a screenshot first when unsure of the current state.
- Press the Enter key to submit forms.
- Use the wait tool after actions that trigger slow transitions.

When the task is complete, reply with a plain text summary and no tool \
calls.";

/// Blocking Messages API client.
pub struct AnthropicBridge {
    agent: ureq::Agent,
    config: ModelConfig,
}

impl AnthropicBridge {
    pub fn new(config: ModelConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { agent, config }
    }

    fn observation_blocks(observation: &Observation) -> Vec<ContentBlock> {
        match observation {
            Observation::Screen { base64 } => vec![
                ContentBlock::text("Current screen:"),
                ContentBlock::Image {
                    source: ImageSource::png(base64.clone()),
                },
            ],
            Observation::ActionFailure { action, message } => vec![ContentBlock::text(format!(
                "The action `{}` failed: {}. Take a different approach or \
                 report that the task cannot be completed.",
                action, message
            ))],
        }
    }

    fn result_block(record: &crate::agent::transcript::ActionRecord) -> ContentBlock {
        let (content, is_error) = match &record.outcome {
            ActionOutcome::Ok { result } => match result {
                ActionResult::Ack { detail } => (vec![ContentBlock::text(detail.clone())], false),
                // Historical screenshots are replaced with placeholders;
                // only the latest observation ships pixels.
                ActionResult::Image { .. } => {
                    (vec![ContentBlock::text("(screenshot captured)")], false)
                }
                ActionResult::Shell {
                    stdout,
                    stderr,
                    exit_code,
                } => (
                    vec![ContentBlock::text(format!(
                        "exit code {}\nstdout:\n{}\nstderr:\n{}",
                        exit_code, stdout, stderr
                    ))],
                    false,
                ),
            },
            ActionOutcome::Failed { message, .. } => {
                (vec![ContentBlock::text(message.clone())], true)
            }
        };
        ContentBlock::ToolResult {
            tool_use_id: record.tool_use_id.clone(),
            content,
            is_error,
        }
    }

    /// Rebuild the full conversation for the next turn.
    fn build_messages(
        &self,
        instruction: &str,
        transcript: &Transcript,
        observation: &Observation,
    ) -> Vec<Message> {
        let mut messages = vec![Message {
            role: Role::User,
            content: vec![ContentBlock::text(instruction)],
        }];

        for turn in transcript.turns() {
            let mut assistant = Vec::new();
            if self.config.replay_reasoning {
                if let Some(reasoning) = &turn.reasoning {
                    assistant.push(ContentBlock::text(reasoning.clone()));
                }
            }
            for record in &turn.actions {
                let (name, input) = encode_tool_use(&record.request);
                assistant.push(ContentBlock::ToolUse {
                    id: record.tool_use_id.clone(),
                    name: name.to_string(),
                    input,
                });
            }
            if assistant.is_empty() {
                continue;
            }
            messages.push(Message {
                role: Role::Assistant,
                content: assistant,
            });
            messages.push(Message {
                role: Role::User,
                content: turn.actions.iter().map(Self::result_block).collect(),
            });
        }

        // Alternation invariant: the last message here is always from the
        // user, so the observation is appended rather than pushed.
        let blocks = Self::observation_blocks(observation);
        match messages.last_mut() {
            Some(last) if last.role == Role::User => last.content.extend(blocks),
            _ => messages.push(Message {
                role: Role::User,
                content: blocks,
            }),
        }

        messages
    }

    fn build_request(
        &self,
        instruction: &str,
        transcript: &Transcript,
        observation: &Observation,
    ) -> MessagesRequest {
        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: DESKTOP_GUIDELINES.to_string(),
            messages: self.build_messages(instruction, transcript, observation),
            tools: tool_definitions(),
            thinking: self
                .config
                .thinking_enabled
                .then(|| ThinkingConfig::enabled(THINKING_BUDGET_TOKENS)),
        }
    }
}

impl ModelBridge for AnthropicBridge {
    fn next_turn(
        &self,
        instruction: &str,
        transcript: &Transcript,
        observation: &Observation,
    ) -> Result<ModelTurn> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| Error::ModelUnavailable("no API key configured".to_string()))?;

        let request = self.build_request(instruction, transcript, observation);
        let body =
            serde_json::to_value(&request).map_err(|e| Error::ModelProtocol(e.to_string()))?;
        let url = format!("{}/v1/messages", self.config.base_url);

        log::debug!(
            "model request: {} messages, turn {}",
            request.messages.len(),
            transcript.len() + 1
        );

        let response = self
            .agent
            .post(&url)
            .set("x-api-key", &api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .send_json(body)
            .map_err(|e| match e {
                ureq::Error::Status(code, response) => {
                    let body = response.into_string().unwrap_or_default();
                    Error::ModelUnavailable(format!("HTTP {}: {}", code, body))
                }
                ureq::Error::Transport(transport) => Error::ModelUnavailable(transport.to_string()),
            })?;

        let parsed: MessagesResponse = response
            .into_json()
            .map_err(|e| Error::ModelProtocol(format!("invalid reply body: {}", e)))?;

        parse_response(&parsed)
    }
}

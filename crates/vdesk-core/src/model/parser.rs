//! The tool vocabulary: schemas offered to the model, and the mapping
//! between `tool_use` blocks and typed [`ActionRequest`]s.

use serde_json::{json, Value};

use crate::action::{
    ActionRequest, MouseButton, ScrollDirection, MAX_SCROLL_AMOUNT, MAX_WAIT_SECONDS,
};
use crate::error::{Error, Result};

use super::types::{ContentBlock, MessagesResponse, ToolDefinition};
use super::{ModelTurn, RequestedAction};

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

fn coordinate_properties() -> Value {
    json!({
        "x": {"type": "integer", "description": "X coordinate in pixels"},
        "y": {"type": "integer", "description": "Y coordinate in pixels"},
    })
}

/// The closed tool set, one tool per action primitive.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "left_click",
            "Left-click at the given screen coordinates.",
            coordinate_properties(),
            &["x", "y"],
        ),
        tool(
            "right_click",
            "Right-click at the given screen coordinates.",
            coordinate_properties(),
            &["x", "y"],
        ),
        tool(
            "double_click",
            "Double-click at the given screen coordinates. Use this to open applications and files.",
            coordinate_properties(),
            &["x", "y"],
        ),
        tool(
            "scroll",
            "Scroll the screen in a direction.",
            json!({
                "direction": {"type": "string", "enum": ["up", "down", "left", "right"]},
                "amount": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_SCROLL_AMOUNT,
                    "description": "Number of scroll steps",
                },
            }),
            &["direction", "amount"],
        ),
        tool(
            "type_text",
            "Type text at the current cursor position.",
            json!({"text": {"type": "string"}}),
            &["text"],
        ),
        tool(
            "press_key",
            "Press a key or key combination, e.g. \"Enter\" or \"ctrl+c\".",
            json!({"key": {"type": "string"}}),
            &["key"],
        ),
        tool(
            "screenshot",
            "Capture the current screen.",
            json!({}),
            &[],
        ),
        tool(
            "execute_bash",
            "Run a bash command on the desktop and return its output.",
            json!({"command": {"type": "string"}}),
            &["command"],
        ),
        tool(
            "wait",
            "Pause before the next action, for slow UI transitions.",
            json!({
                "seconds": {
                    "type": "number",
                    "exclusiveMinimum": 0,
                    "maximum": MAX_WAIT_SECONDS,
                },
            }),
            &["seconds"],
        ),
    ]
}

fn u32_field(input: &Value, field: &str) -> Result<u32> {
    input
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::ModelProtocol(format!("tool input missing integer `{}`", field)))
}

fn str_field<'a>(input: &'a Value, field: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::ModelProtocol(format!("tool input missing string `{}`", field)))
}

/// Decode one `tool_use` block into a typed action request.
///
/// Only shapes the model could never legally produce are rejected here;
/// range checks (coordinates on screen, scroll caps) stay in
/// `ActionRequest::validate` so a bad value comes back to the model as a
/// failure observation rather than aborting the run.
pub fn decode_tool_use(name: &str, input: &Value) -> Result<ActionRequest> {
    match name {
        "left_click" => Ok(ActionRequest::Click {
            x: u32_field(input, "x")?,
            y: u32_field(input, "y")?,
            button: MouseButton::Left,
        }),
        "right_click" => Ok(ActionRequest::Click {
            x: u32_field(input, "x")?,
            y: u32_field(input, "y")?,
            button: MouseButton::Right,
        }),
        "double_click" => Ok(ActionRequest::DoubleClick {
            x: u32_field(input, "x")?,
            y: u32_field(input, "y")?,
        }),
        "scroll" => {
            let direction = match str_field(input, "direction")? {
                "up" => ScrollDirection::Up,
                "down" => ScrollDirection::Down,
                "left" => ScrollDirection::Left,
                "right" => ScrollDirection::Right,
                other => {
                    return Err(Error::ModelProtocol(format!(
                        "unknown scroll direction `{}`",
                        other
                    )))
                }
            };
            Ok(ActionRequest::Scroll {
                direction,
                amount: u32_field(input, "amount")?,
            })
        }
        "type_text" => Ok(ActionRequest::TypeText {
            text: str_field(input, "text")?.to_string(),
            allow_empty: false,
        }),
        "press_key" => Ok(ActionRequest::PressKey {
            key: str_field(input, "key")?.to_string(),
        }),
        "screenshot" => Ok(ActionRequest::Screenshot),
        "execute_bash" => Ok(ActionRequest::ExecuteShell {
            command: str_field(input, "command")?.to_string(),
        }),
        "wait" => {
            let seconds = input
                .get("seconds")
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    Error::ModelProtocol("tool input missing number `seconds`".to_string())
                })?;
            Ok(ActionRequest::Wait { seconds })
        }
        other => Err(Error::ModelProtocol(format!("unknown tool `{}`", other))),
    }
}

/// Encode a typed request back into the tool name and input the model's
/// vocabulary uses, for transcript replay.
pub fn encode_tool_use(request: &ActionRequest) -> (&'static str, Value) {
    match request {
        ActionRequest::Click {
            x,
            y,
            button: MouseButton::Left,
        } => ("left_click", json!({"x": x, "y": y})),
        ActionRequest::Click {
            x,
            y,
            button: MouseButton::Right,
        } => ("right_click", json!({"x": x, "y": y})),
        // Middle click has no tool of its own; replayed as a left click
        // position-wise, which only affects how history reads.
        ActionRequest::Click {
            x,
            y,
            button: MouseButton::Middle,
        } => ("left_click", json!({"x": x, "y": y})),
        ActionRequest::DoubleClick { x, y } => ("double_click", json!({"x": x, "y": y})),
        ActionRequest::Scroll { direction, amount } => (
            "scroll",
            json!({"direction": direction, "amount": amount}),
        ),
        ActionRequest::TypeText { text, .. } => ("type_text", json!({"text": text})),
        ActionRequest::PressKey { key } => ("press_key", json!({"key": key})),
        ActionRequest::Screenshot => ("screenshot", json!({})),
        ActionRequest::ExecuteShell { command } => ("execute_bash", json!({"command": command})),
        ActionRequest::Wait { seconds } => ("wait", json!({"seconds": seconds})),
    }
}

/// Classify a model reply: tool calls become an action batch, otherwise the
/// text is the final answer.
pub fn parse_response(response: &MessagesResponse) -> Result<ModelTurn> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut requests: Vec<RequestedAction> = Vec::new();

    for block in &response.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                requests.push(RequestedAction {
                    tool_use_id: id.clone(),
                    request: decode_tool_use(name, input)?,
                });
            }
            ContentBlock::Thinking { .. } => {}
            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {
                return Err(Error::ModelProtocol(
                    "unexpected block type in model reply".to_string(),
                ));
            }
        }
    }

    let text = text_parts.join("\n");
    if !requests.is_empty() {
        Ok(ModelTurn::ActionBatch {
            reasoning: if text.is_empty() { None } else { Some(text) },
            requests,
        })
    } else if !text.is_empty() {
        Ok(ModelTurn::Answer { text })
    } else {
        Err(Error::ModelProtocol(
            "reply contained neither text nor tool use".to_string(),
        ))
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// A single message on the provider wire.
///
/// Assistant messages may carry `tool_calls`; tool messages carry the
/// `tool_call_id` they answer.  Both are `None` for plain text turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl WireMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: text.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: text.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: text.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(calls),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }

    /// Approximate token count used for context accounting.
    ///
    /// 4-chars-per-token heuristic on the content plus a flat 4-token
    /// structural overhead per message; tool calls contribute their name and
    /// serialized arguments.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        if let Some(calls) = &self.tool_calls {
            for c in calls {
                chars += c.name.len() + c.arguments.len();
            }
        }
        chars / 4 + 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A fully assembled tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// A tool definition offered to the model (`type: function` on the wire).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Request sent to a chat provider.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub tools: Vec<ToolDefinition>,
    pub stream: bool,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// One streamed delta from the provider.
///
/// Tool-call fragments are identified by `id` on the first fragment only;
/// later fragments carry just an `arguments` chunk and belong to the most
/// recently opened call.
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    pub finish_reason: Option<String>,
}

impl ChatChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self { content: Some(delta.into()), ..Default::default() }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self { finish_reason: Some(reason.into()), ..Default::default() }
    }

    /// First fragment of a tool call: carries the call id and name.
    pub fn tool_call_open(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            tool_calls: Some(vec![ToolCallDelta {
                id: Some(id.into()),
                name: Some(name.into()),
                arguments: Some(arguments.into()),
            }]),
            ..Default::default()
        }
    }

    /// Continuation fragment: arguments only, appended to the newest call.
    pub fn tool_call_args(arguments: impl Into<String>) -> Self {
        Self {
            tool_calls: Some(vec![ToolCallDelta {
                id: None,
                name: None,
                arguments: Some(arguments.into()),
            }]),
            ..Default::default()
        }
    }
}

/// A fragment of a tool call inside a streamed chunk.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Non-streaming completion result.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Usage,
}

/// Token usage from one completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

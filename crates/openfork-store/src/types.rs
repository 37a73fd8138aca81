// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use openfork_permissions::Ruleset;

/// Messages are ordered by a store-assigned monotonically increasing id.
pub type MessageId = i64;
pub type PartId = i64;

/// A workspace the orchestrator operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub working_dir: std::path::PathBuf,
}

impl Project {
    pub fn new(name: impl Into<String>, working_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { id: Uuid::new_v4().to_string(), name: name.into(), working_dir: working_dir.into() }
    }
}

/// One conversation, owned by a project and driven by one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub agent_slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(project_id: impl Into<String>, agent_slug: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            agent_slug: agent_slug.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A persisted conversation message.
///
/// Retired messages are flagged `is_compacted` by the compaction layer and
/// excluded from active history; they are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Serialized tool-call array, present on assistant messages that
    /// requested tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<String>,
    /// The call this tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub is_compacted: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// 4-chars-per-token heuristic plus per-message structural overhead.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        if let Some(tc) = &self.tool_calls {
            chars += tc.len();
        }
        chars / 4 + 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Tool invocation part: the full lifecycle of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPart {
    pub call_id: String,
    pub tool_name: String,
    pub title: String,
    pub status: ToolStatus,
    pub input: Value,
    pub output: String,
    #[serde(default)]
    pub is_pruned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spill_path: Option<std::path::PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl ToolPart {
    pub fn pending(call_id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        let tool_name = tool_name.into();
        Self {
            call_id: call_id.into(),
            title: tool_name.clone(),
            tool_name,
            status: ToolStatus::Pending,
            input,
            output: String::new(),
            is_pruned: false,
            started_at: None,
            completed_at: None,
            error_code: None,
            spill_path: None,
            attachments: Vec::new(),
        }
    }
}

/// Boundary marker written by conversation compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionPart {
    pub summary: String,
    pub compacted_message_count: usize,
    pub compacted_token_count: usize,
    pub compacted_at: DateTime<Utc>,
}

/// Polymorphic message part, ordered within its message.
///
/// The descriptive kinds (`File`, `Patch`, `Step`, `Subtask`, `Agent`,
/// `Retry`, `Snapshot`) are carried through storage but never mutated by the
/// core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Reasoning { text: String },
    Tool(ToolPart),
    Compaction(CompactionPart),
    File { path: String },
    Patch { diff: String },
    Step { title: String },
    Subtask { description: String },
    Agent { slug: String },
    Retry { attempt: u32, error: String },
    Snapshot { state: Value },
}

impl MessagePart {
    pub fn as_tool(&self) -> Option<&ToolPart> {
        match self {
            Self::Tool(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_compaction(&self) -> Option<&CompactionPart> {
        match self {
            Self::Compaction(c) => Some(c),
            _ => None,
        }
    }

    /// Token estimate used by the pruning layer.
    pub fn approx_tokens(&self) -> usize {
        let chars = match self {
            Self::Text { text } | Self::Reasoning { text } => text.len(),
            Self::Tool(t) => t.output.len() + t.input.to_string().len(),
            Self::Compaction(c) => c.summary.len(),
            Self::File { path } => path.len(),
            Self::Patch { diff } => diff.len(),
            Self::Step { title } => title.len(),
            Self::Subtask { description } => description.len(),
            Self::Agent { slug } => slug.len(),
            Self::Retry { error, .. } => error.len(),
            Self::Snapshot { state } => state.to_string().len(),
        };
        (chars / 4).max(1)
    }
}

/// A stored part together with its position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRecord {
    pub id: PartId,
    pub session_id: String,
    pub message_id: MessageId,
    pub order_index: i32,
    pub part: MessagePart,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubSessionStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SubSessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A child agent execution spawned from a parent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubSession {
    pub id: String,
    pub parent_session_id: String,
    pub parent_message_id: MessageId,
    pub agent_slug: String,
    pub status: SubSessionStatus,
    pub prompt: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub max_iterations: u32,
    pub iterations_used: u32,
    pub effective_permissions: Ruleset,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

use openfork_permissions::PromptRequest;
use openfork_store::SubSessionStatus;

/// Every event published on the orchestrator bus.
///
/// Consumers (UI, logs, remote bridges) subscribe to the bus and match on the
/// variants they care about; [`topic`](Self::topic) gives the per-topic FIFO
/// grouping key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    SubSessionCreated {
        subsession_id: String,
        parent_session_id: String,
        agent_slug: String,
    },
    SubSessionStatusChanged {
        subsession_id: String,
        from: SubSessionStatus,
        to: SubSessionStatus,
    },
    SubSessionProgress {
        subsession_id: String,
        part_type: String,
        content: String,
    },
    SubSessionCompleted {
        subsession_id: String,
        result: String,
    },
    SubSessionFailed {
        subsession_id: String,
        error: String,
    },
    SubSessionCancelled {
        subsession_id: String,
        reason: String,
    },
    MessageCompacted {
        session_id: String,
        compacted_message_count: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    ToolExecuted {
        session_id: String,
        call_id: String,
        tool_name: String,
        success: bool,
    },
    UserPromptRequest(PromptRequest),
}

impl OrchestratorEvent {
    /// Grouping key for per-topic delivery ordering.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::SubSessionCreated { .. }
            | Self::SubSessionStatusChanged { .. }
            | Self::SubSessionProgress { .. }
            | Self::SubSessionCompleted { .. }
            | Self::SubSessionFailed { .. }
            | Self::SubSessionCancelled { .. } => "subsession",
            Self::MessageCompacted { .. } => "context",
            Self::ToolExecuted { .. } => "tool",
            Self::UserPromptRequest(_) => "prompt",
        }
    }
}

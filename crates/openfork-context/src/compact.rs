// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use openfork_events::{EventBus, OrchestratorEvent};
use openfork_model::{ChatProvider, ChatRequest, WireMessage};
use openfork_store::{
    CompactionPart, MessagePart, MessageRecord, MessageRepository, MessageRole, PartRepository,
};

/// Fraction of the context window at which compaction fires.
pub const COMPACTION_THRESHOLD: f32 = 0.90;
/// Percent of the window targeted after compaction.
pub const COMPACTION_TARGET_PERCENT: usize = 50;
/// Cap on the generated summary.
pub const SUMMARY_MAX_TOKENS: u32 = 2_000;

/// Markers wrapping the stored summary in the synthetic system message.
pub const SUMMARY_HEADER: &str = "=== CONVERSATION SUMMARY (earlier history compacted) ===";
pub const SUMMARY_FOOTER: &str = "=== END SUMMARY ===";

const SUMMARY_SYSTEM_PROMPT: &str = "\
You are a conversation compaction assistant. Summarise the conversation \
below into a dense, factual checkpoint with EXACTLY these sections:\n\
\n\
## Context\n## Key Decisions\n## Changes Made\n## Current State\n## Pending Items\n\
\n\
Preserve file paths, identifiers, error messages, and decisions verbatim \
where they matter. The summary replaces the original history, so include \
everything needed to continue correctly.";

/// What one compaction attempt did.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub was_compacted: bool,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub compacted_message_count: usize,
    pub boundary_message_id: Option<i64>,
}

impl CompactionOutcome {
    fn noop(current_tokens: usize) -> Self {
        Self {
            was_compacted: false,
            tokens_before: current_tokens,
            tokens_after: current_tokens,
            compacted_message_count: 0,
            boundary_message_id: None,
        }
    }
}

/// L3: replace the oldest half of a conversation with an LLM summary behind
/// a persistent boundary part.
///
/// Summarization deliberately runs on the process-default model, not the
/// turn's agent model; the model id is injected here.
pub struct Compactor {
    provider: Arc<dyn ChatProvider>,
    model_id: String,
    messages: Arc<dyn MessageRepository>,
    parts: Arc<dyn PartRepository>,
    events: Arc<EventBus>,
}

impl Compactor {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        model_id: impl Into<String>,
        messages: Arc<dyn MessageRepository>,
        parts: Arc<dyn PartRepository>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            messages,
            parts,
            events,
        }
    }

    /// Compact `session_id` if `current_tokens` crossed the threshold.
    pub async fn maybe_compact(
        &self,
        session_id: &str,
        current_tokens: usize,
        context_limit: usize,
    ) -> anyhow::Result<CompactionOutcome> {
        let threshold = (context_limit as f32 * COMPACTION_THRESHOLD) as usize;
        if context_limit == 0 || current_tokens < threshold {
            return Ok(CompactionOutcome::noop(current_tokens));
        }

        let active = self.messages.list_active_by_session(session_id).await?;
        let candidates: Vec<&MessageRecord> = active
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();

        // Oldest-first prefix reaching the removal target; the newest
        // candidate always survives so the boundary has somewhere to attach.
        let target = context_limit * COMPACTION_TARGET_PERCENT / 100;
        let tokens_to_remove = current_tokens.saturating_sub(target);
        let mut selected = 0usize;
        let mut removed_tokens = 0usize;
        for message in &candidates {
            if removed_tokens >= tokens_to_remove || selected + 1 >= candidates.len() {
                break;
            }
            removed_tokens += message.approx_tokens();
            selected += 1;
        }
        if selected < 2 {
            return Ok(CompactionOutcome::noop(current_tokens));
        }

        let prefix = &candidates[..selected];
        let boundary = candidates[selected];

        let summary = self.summarize(prefix).await;

        let part = CompactionPart {
            summary,
            compacted_message_count: selected,
            compacted_token_count: removed_tokens,
            compacted_at: Utc::now(),
        };
        self.parts
            .append_part(session_id, boundary.id, MessagePart::Compaction(part))
            .await?;

        let ids: Vec<i64> = prefix.iter().map(|m| m.id).collect();
        self.messages.mark_compacted(&ids).await?;

        let tokens_after = current_tokens.saturating_sub(removed_tokens);
        info!(
            session_id,
            compacted = selected,
            tokens_before = current_tokens,
            tokens_after,
            "conversation compacted"
        );
        self.events.publish(OrchestratorEvent::MessageCompacted {
            session_id: session_id.to_string(),
            compacted_message_count: selected,
            tokens_before: current_tokens,
            tokens_after,
        });

        Ok(CompactionOutcome {
            was_compacted: true,
            tokens_before: current_tokens,
            tokens_after,
            compacted_message_count: selected,
            boundary_message_id: Some(boundary.id),
        })
    }

    /// Session history for the next request.  With no boundary this is the
    /// active message list; past a boundary it is a synthetic summary system
    /// message (sentinel id 0) followed by every message with an id strictly
    /// greater than the boundary message id.
    pub async fn load_messages_with_boundary(
        &self,
        session_id: &str,
    ) -> anyhow::Result<Vec<MessageRecord>> {
        let Some(record) = self.parts.get_most_recent_compaction(session_id).await? else {
            return Ok(self.messages.list_active_by_session(session_id).await?);
        };
        let summary = record
            .part
            .as_compaction()
            .map(|c| c.summary.clone())
            .unwrap_or_default();

        let synthetic = MessageRecord {
            id: 0,
            session_id: session_id.to_string(),
            role: MessageRole::System,
            content: format!("{SUMMARY_HEADER}\n{summary}\n{SUMMARY_FOOTER}"),
            tool_calls: None,
            tool_call_id: None,
            is_compacted: false,
            created_at: record.updated_at,
        };

        let mut result = vec![synthetic];
        result.extend(self.messages.list_after(session_id, record.message_id).await?);
        Ok(result)
    }

    async fn summarize(&self, prefix: &[&MessageRecord]) -> String {
        let history = prefix
            .iter()
            .map(|m| {
                let role = match m.role {
                    MessageRole::System => "SYSTEM",
                    MessageRole::User => "USER",
                    MessageRole::Assistant => "ASSISTANT",
                    MessageRole::Tool => "TOOL",
                };
                format!("[{role}]\n{}\n", m.content)
            })
            .collect::<Vec<_>>()
            .join("");

        let request = ChatRequest {
            model: self.model_id.clone(),
            messages: vec![
                WireMessage::system(SUMMARY_SYSTEM_PROMPT),
                WireMessage::user(history),
            ],
            tools: vec![],
            stream: false,
            max_tokens: Some(SUMMARY_MAX_TOKENS),
            temperature: Some(0.0),
        };

        match self.provider.chat(request).await {
            Ok(response) if !response.content.is_empty() => response.content,
            Ok(_) => {
                warn!("compaction model returned an empty summary");
                "[Summary unavailable: compaction model returned no content]".to_string()
            }
            Err(e) => {
                warn!(error = %e, "compaction model call failed");
                format!("[Summary unavailable: {e}]")
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

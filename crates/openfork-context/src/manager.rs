// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tracing::debug;

use openfork_config::LimitsConfig;
use openfork_store::{MessagePart, MessageRepository, PartRepository};

use crate::prune::{prune_parts, PruneOutcome};

/// Applies L2 pruning to a session's stored parts and keeps the persisted
/// tool messages consistent with the clipped outputs.
pub struct ContextManager {
    messages: Arc<dyn MessageRepository>,
    parts: Arc<dyn PartRepository>,
    limits: LimitsConfig,
}

impl ContextManager {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        parts: Arc<dyn PartRepository>,
        limits: LimitsConfig,
    ) -> Self {
        Self { messages, parts, limits }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Prune a session's old tool outputs in place.
    ///
    /// Runs the pure pruning pass over the session's parts, persists every
    /// clipped part, and rewrites the content of the tool message that
    /// carried it so the next request shrinks accordingly.
    pub async fn prune_session(
        &self,
        session_id: &str,
        current_tokens: usize,
        context_limit: usize,
    ) -> anyhow::Result<PruneOutcome> {
        let before = self.parts.list_parts_by_session(session_id).await?;
        let outcome = prune_parts(&before, current_tokens, context_limit);
        if !outcome.was_pruned {
            return Ok(outcome);
        }

        let active = self.messages.list_active_by_session(session_id).await?;
        for (old, new) in before.iter().zip(outcome.parts.iter()) {
            let newly_pruned = matches!(
                (&old.part, &new.part),
                (MessagePart::Tool(a), MessagePart::Tool(b)) if !a.is_pruned && b.is_pruned
            );
            if !newly_pruned {
                continue;
            }
            self.parts.replace_part(new.clone()).await?;

            if let MessagePart::Tool(tool) = &new.part {
                if let Some(message) = active
                    .iter()
                    .find(|m| m.tool_call_id.as_deref() == Some(tool.call_id.as_str()))
                {
                    self.messages
                        .update_content(message.id, tool.output.clone())
                        .await?;
                }
            }
        }

        debug!(
            session_id,
            parts_pruned = outcome.parts_pruned,
            tokens_after = outcome.tokens_after,
            "session pruned"
        );
        Ok(outcome)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use openfork_store::{
        InMemoryStore, MessageRole, NewMessage, ToolPart, ToolStatus,
    };

    use super::*;

    async fn seed_tool_call(store: &InMemoryStore, session: &str, call_id: &str, output_len: usize) {
        let output = "o".repeat(output_len);
        let m = store
            .append_message(NewMessage::tool_result(session, call_id, output.clone()))
            .await
            .unwrap();
        let mut tool = ToolPart::pending(call_id, "bash", json!({}));
        tool.status = ToolStatus::Completed;
        tool.output = output;
        store
            .append_part(session, m.id, MessagePart::Tool(tool))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pruned_parts_and_messages_are_persisted() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..4 {
            seed_tool_call(&store, "s1", &format!("c{i}"), 120_000).await;
        }
        // a recent user message so the protect window has something newer
        store
            .append_message(NewMessage::text("s1", MessageRole::User, "latest question"))
            .await
            .unwrap();

        let manager = ContextManager::new(store.clone(), store.clone(), LimitsConfig::default());
        let outcome = manager.prune_session("s1", 120_000, 128_000).await.unwrap();
        assert!(outcome.was_pruned);
        assert!(outcome.parts_pruned >= 1);

        // part persisted as pruned
        let parts = store.list_parts_by_session("s1").await.unwrap();
        let pruned: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.part.as_tool())
            .filter(|t| t.is_pruned)
            .map(|t| t.call_id.as_str())
            .collect();
        assert!(pruned.contains(&"c0"));

        // the carrying tool message was rewritten to the clipped output
        let messages = store.list_active_by_session("s1").await.unwrap();
        let msg = messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c0"))
            .unwrap();
        assert!(msg.content.contains("[Output pruned: kept first 2000 chars]"));
        assert!(msg.content.len() < 3_000);
    }

    #[tokio::test]
    async fn noop_prune_leaves_store_untouched() {
        let store = Arc::new(InMemoryStore::new());
        seed_tool_call(&store, "s1", "c0", 50_000).await;
        let manager = ContextManager::new(store.clone(), store.clone(), LimitsConfig::default());
        let outcome = manager.prune_session("s1", 20_000, 128_000).await.unwrap();
        assert!(!outcome.was_pruned);

        let messages = store.list_active_by_session("s1").await.unwrap();
        assert_eq!(messages[0].content.len(), 50_000);
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use openfork_model::{ToolDefinition, WireMessage};
use openfork_store::MessageRecord;

/// Coarse 4-chars-per-token heuristic.  Never promises tokenizer fidelity;
/// every consumer treats the result as an estimate.
pub fn estimate_text(text: &str) -> usize {
    text.len() / 4
}

/// Estimate for a stored message list.
pub fn estimate_messages(messages: &[MessageRecord]) -> usize {
    messages.iter().map(MessageRecord::approx_tokens).sum()
}

/// Estimate for a fully assembled request: message payloads plus the
/// serialized tool schemas that ride along with every call.
pub fn estimate_request(messages: &[WireMessage], tools: &[ToolDefinition]) -> usize {
    let message_tokens: usize = messages.iter().map(WireMessage::approx_tokens).sum();
    let schema_tokens: usize = tools
        .iter()
        .map(|t| {
            (t.name.len() + t.description.len() + t.parameters.to_string().len()) / 4
        })
        .sum();
    message_tokens + schema_tokens
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_estimate_divides_by_four() {
        assert_eq!(estimate_text("12345678"), 2);
        assert_eq!(estimate_text(""), 0);
    }

    #[test]
    fn request_estimate_includes_schema_length() {
        let messages = vec![WireMessage::user("12345678")]; // 2 + 4 overhead
        let without = estimate_request(&messages, &[]);
        assert_eq!(without, 6);

        let tools = vec![ToolDefinition {
            name: "read".into(),
            description: "read a file".into(),
            parameters: json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        }];
        let with = estimate_request(&messages, &tools);
        assert!(with > without);
    }
}

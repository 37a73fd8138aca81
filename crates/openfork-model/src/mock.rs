// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::provider::{ChatProvider, ChunkStream};
use crate::types::{ChatChunk, ChatRequest, ChatResponse, Usage};

/// One scripted provider call.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Emit these chunks in order, then end the stream.
    Chunks(Vec<ChatChunk>),
    /// Fail the call with this error text (before any chunk is produced).
    Error(String),
    /// Emit the chunks, then fail mid-stream with this error text.
    ChunksThenError(Vec<ChatChunk>, String),
}

/// A pre-scripted provider.  Each call pops the next turn from the front of
/// the queue, so tests can specify exact delta sequences (fragmented tool
/// calls, finish reasons, transport errors) without network access.
pub struct ScriptedProvider {
    turns: Arc<Mutex<Vec<ScriptedTurn>>>,
    /// Every `ChatRequest` seen, in call order, for test inspection.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Convenience: provider that always streams a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![ScriptedTurn::Chunks(vec![
            ChatChunk::text(reply.into()),
            ChatChunk::finish("stop"),
        ])])
    }

    /// Convenience: a tool call (single fragment) followed by a text reply.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            ScriptedTurn::Chunks(vec![
                ChatChunk::tool_call_open(call_id, tool_name, args_json),
                ChatChunk::finish("tool_calls"),
            ]),
            ScriptedTurn::Chunks(vec![
                ChatChunk::text(final_text.into()),
                ChatChunk::finish("stop"),
            ]),
        ])
    }

    fn next_turn(&self) -> ScriptedTurn {
        let mut turns = self.turns.lock().unwrap();
        if turns.is_empty() {
            ScriptedTurn::Chunks(vec![
                ChatChunk::text("[no more scripts]"),
                ChatChunk::finish("stop"),
            ])
        } else {
            turns.remove(0)
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(req);
        match self.next_turn() {
            ScriptedTurn::Error(e) | ScriptedTurn::ChunksThenError(_, e) => {
                Err(anyhow::anyhow!(e))
            }
            ScriptedTurn::Chunks(chunks) => {
                let content: String = chunks.iter().filter_map(|c| c.content.clone()).collect();
                Ok(ChatResponse {
                    content,
                    usage: Usage { input_tokens: 10, output_tokens: 10 },
                })
            }
        }
    }

    async fn stream_chat(&self, req: ChatRequest) -> anyhow::Result<ChunkStream> {
        self.requests.lock().unwrap().push(req);
        match self.next_turn() {
            ScriptedTurn::Error(e) => Err(anyhow::anyhow!(e)),
            ScriptedTurn::Chunks(chunks) => {
                let wrapped: Vec<anyhow::Result<ChatChunk>> =
                    chunks.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(wrapped)))
            }
            ScriptedTurn::ChunksThenError(chunks, e) => {
                let mut wrapped: Vec<anyhow::Result<ChatChunk>> =
                    chunks.into_iter().map(Ok).collect();
                wrapped.push(Err(anyhow::anyhow!(e)));
                Ok(Box::pin(stream::iter(wrapped)))
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn req() -> ChatRequest {
        ChatRequest {
            model: "scripted".into(),
            messages: vec![crate::types::WireMessage::user("hi")],
            stream: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn always_text_streams_reply_then_stop() {
        let p = ScriptedProvider::always_text("hello");
        let mut s = p.stream_chat(req()).await.unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("hello"));
        let last = s.next().await.unwrap().unwrap();
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn error_turn_fails_the_call() {
        let p = ScriptedProvider::new(vec![ScriptedTurn::Error("connection reset".into())]);
        assert!(p.stream_chat(req()).await.is_err());
    }

    #[tokio::test]
    async fn turns_are_consumed_in_order() {
        let p = ScriptedProvider::tool_then_text("c1", "list", "{}", "done");
        let mut s1 = p.stream_chat(req()).await.unwrap();
        let first = s1.next().await.unwrap().unwrap();
        assert!(first.tool_calls.is_some());

        let mut s2 = p.stream_chat(req()).await.unwrap();
        let first = s2.next().await.unwrap().unwrap();
        assert_eq!(first.content.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn chat_concatenates_scripted_text() {
        let p = ScriptedProvider::new(vec![ScriptedTurn::Chunks(vec![
            ChatChunk::text("a"),
            ChatChunk::text("b"),
            ChatChunk::finish("stop"),
        ])]);
        let resp = p.chat(req()).await.unwrap();
        assert_eq!(resp.content, "ab");
    }

    #[tokio::test]
    async fn requests_are_recorded_for_inspection() {
        let p = ScriptedProvider::always_text("x");
        let _ = p.stream_chat(req()).await.unwrap();
        assert_eq!(p.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_scripts_fall_back_to_sentinel() {
        let p = ScriptedProvider::new(vec![]);
        let mut s = p.stream_chat(req()).await.unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert!(first.content.unwrap().contains("no more scripts"));
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::types::{ChatChunk, ChatRequest, ChatResponse};

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<ChatChunk>> + Send>>;

/// Transport-agnostic chat provider.
///
/// The orchestrator core only ever talks to this trait; concrete HTTP
/// drivers live outside the core and are injected at process init.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name for status display and logs.
    fn name(&self) -> &str;

    /// Single non-streaming completion.  Used for compaction summaries.
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse>;

    /// Streaming completion yielding a sequence of deltas.
    async fn stream_chat(&self, req: ChatRequest) -> anyhow::Result<ChunkStream>;
}

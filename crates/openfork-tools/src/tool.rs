// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub working_dir: PathBuf,
    pub call_id: String,
    /// Id of the assistant message that carried this call, when known.
    pub message_id: Option<i64>,
    /// The turn's cancellation token.  Long-running tools (and anything that
    /// spawns further work, like `task`) must observe it so cancelling the
    /// turn reaches every suspension point.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            working_dir: working_dir.into(),
            call_id: String::new(),
            message_id: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_message_id(mut self, message_id: i64) -> Self {
        self.message_id = Some(message_id);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The result of executing a tool.  Failures are data, not panics: the
/// output is fed back to the model either way.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into() }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self { success: false, output: output.into() }
    }
}

/// Capability trait every tool implements.  The orchestrator core only sees
/// this surface; concrete shell/file/web tools are registered by the embedder.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

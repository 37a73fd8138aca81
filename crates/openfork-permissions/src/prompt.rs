// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;

/// Default time to wait for a user decision before treating it as denied.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// One selectable option in a user prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOption {
    pub key: String,
    pub label: String,
}

impl PromptOption {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self { key: key.into(), label: label.into() }
    }
}

/// An out-of-band request for a user decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub id: String,
    pub title: String,
    pub message: String,
    pub options: Vec<PromptOption>,
    pub default_option: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// The user's answer, or how the prompt ended without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub option: String,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub cancelled: bool,
}

impl PromptResponse {
    pub fn selected(option: impl Into<String>) -> Self {
        Self { option: option.into(), timed_out: false, cancelled: false }
    }

    fn timed_out(default_option: &str) -> Self {
        Self { option: default_option.to_string(), timed_out: true, cancelled: false }
    }
}

/// Where prompt requests are surfaced (UI, event bus, test harness).
pub trait PromptSink: Send + Sync {
    fn deliver(&self, request: &PromptRequest);
}

/// Asks the user a question and waits for the answer.
#[async_trait]
pub trait PromptService: Send + Sync {
    async fn prompt(&self, request: PromptRequest) -> PromptResponse;
}

/// Event-driven prompt service.
///
/// `prompt` delivers the request through the sink and parks on a oneshot
/// channel keyed by request id; the UI answers via [`provide_response`].
/// Timeout or a dropped channel resolves to the default option with the
/// corresponding flag set.
///
/// [`provide_response`]: EventDrivenPromptService::provide_response
pub struct EventDrivenPromptService {
    sink: std::sync::Arc<dyn PromptSink>,
    pending: DashMap<String, oneshot::Sender<PromptResponse>>,
}

impl EventDrivenPromptService {
    pub fn new(sink: std::sync::Arc<dyn PromptSink>) -> Self {
        Self { sink, pending: DashMap::new() }
    }

    /// Resolve a pending prompt.  Returns `false` when the request id is
    /// unknown (already timed out or answered).
    pub fn provide_response(&self, request_id: &str, response: PromptResponse) -> bool {
        match self.pending.remove(request_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                warn!(request_id, "response for unknown or expired prompt");
                false
            }
        }
    }

    /// Number of prompts currently awaiting an answer.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl PromptService for EventDrivenPromptService {
    async fn prompt(&self, request: PromptRequest) -> PromptResponse {
        let timeout = request
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROMPT_TIMEOUT);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request.id.clone(), tx);
        self.sink.deliver(&request);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            // Sender dropped: the embedder cancelled the prompt.
            Ok(Err(_)) => PromptResponse {
                option: request.default_option.clone(),
                timed_out: false,
                cancelled: true,
            },
            Err(_) => {
                self.pending.remove(&request.id);
                PromptResponse::timed_out(&request.default_option)
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

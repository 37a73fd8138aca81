// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::hook::{Hook, HookContext, HookOutcome};

/// Exit status a command hook uses to veto the guarded action.
const BLOCK_EXIT_CODE: i32 = 2;

/// Declarative hook that runs a shell command.
///
/// The serialized context is fed on stdin.  Exit code 0 means proceed,
/// [`BLOCK_EXIT_CODE`] vetoes the action, anything else is a failure.  If
/// stdout parses as a [`HookOutcome`] it is used verbatim (exit code still
/// wins on veto).
pub struct CommandHook {
    command: String,
    timeout: Duration,
}

impl CommandHook {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self { command: command.into(), timeout }
    }
}

#[async_trait]
impl Hook for CommandHook {
    async fn run(&self, context: &HookContext) -> anyhow::Result<HookOutcome> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stdin) = child.stdin.as_mut() {
            let payload = serde_json::to_vec(context)?;
            stdin.write_all(&payload).await?;
        }
        drop(child.stdin.take());

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("hook command timed out: {}", self.command))??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(command = %self.command, status = ?output.status.code(), "command hook finished");

        if output.status.code() == Some(BLOCK_EXIT_CODE) {
            let reason = stdout.trim();
            return Ok(HookOutcome::cancel(if reason.is_empty() {
                format!("blocked by hook command: {}", self.command)
            } else {
                reason.to_string()
            }));
        }
        if !output.status.success() {
            return Ok(HookOutcome::failed(format!(
                "hook command exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if let Ok(outcome) = serde_json::from_str::<HookOutcome>(stdout.trim()) {
            return Ok(outcome);
        }
        Ok(HookOutcome::proceed())
    }
}

/// Declarative hook that POSTs the context to an HTTP endpoint.
///
/// A 2xx response whose body parses as a [`HookOutcome`] is used verbatim;
/// any other 2xx body means proceed.  Non-2xx responses are failures.
pub struct WebhookHook {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookHook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self { url: url.into(), client: reqwest::Client::new(), timeout }
    }
}

#[async_trait]
impl Hook for WebhookHook {
    async fn run(&self, context: &HookContext) -> anyhow::Result<HookOutcome> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(context)
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(HookOutcome::failed(format!(
                "webhook {} returned {}",
                self.url,
                response.status()
            )));
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(outcome) = serde_json::from_str::<HookOutcome>(&body) {
            return Ok(outcome);
        }
        Ok(HookOutcome::proceed())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

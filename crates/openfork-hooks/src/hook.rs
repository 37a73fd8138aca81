// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every point in the orchestrator where hooks can attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTrigger {
    PreTool,
    PostTool,
    PreEdit,
    PostEdit,
    PreCommand,
    PostCommand,
    PreMessage,
    PostMessage,
    SessionStart,
    SessionEnd,
    OnError,
    OnWarning,
    PreAgentLoop,
    PostAgentLoop,
    MaxIterations,
}

impl HookTrigger {
    /// Pre-triggers may veto the action they guard; everything else is
    /// observational.
    pub fn is_pre(self) -> bool {
        matches!(
            self,
            Self::PreTool | Self::PreEdit | Self::PreCommand | Self::PreMessage | Self::PreAgentLoop
        )
    }
}

impl fmt::Display for HookTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{s}")
    }
}

/// Mutable carrier threaded through one hook pipeline run.
///
/// The `data` bag is shared between hooks of the same pipeline; a hook's
/// returned `data` merges into it for the hooks that follow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookContext {
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

impl HookContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), ..Default::default() }
    }

    pub fn for_tool(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        tool_input: Value,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            tool_name: Some(tool_name.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_input: Some(tool_input),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// What one hook reported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookOutcome {
    pub success: bool,
    /// `false` on a Pre-trigger stops the pipeline and vetoes the action.
    #[serde(rename = "continue")]
    pub proceed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_context: Option<HookContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, Value>>,
}

impl HookOutcome {
    pub fn proceed() -> Self {
        Self { success: true, proceed: true, ..Default::default() }
    }

    pub fn cancel(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            proceed: false,
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            proceed: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.get_or_insert_with(HashMap::new).insert(key.into(), value);
        self
    }
}

/// A hook implementation.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, context: &HookContext) -> anyhow::Result<HookOutcome>;
}

/// A hook bound to a trigger with its scheduling metadata.
#[derive(Clone)]
pub struct RegisteredHook {
    pub id: String,
    pub name: String,
    pub trigger: HookTrigger,
    pub priority: i32,
    pub enabled: bool,
    /// When `false`, a hook failure stops the rest of the pipeline.
    pub continue_on_error: bool,
    pub handler: Arc<dyn Hook>,
}

impl RegisteredHook {
    pub fn new(
        name: impl Into<String>,
        trigger: HookTrigger,
        priority: i32,
        handler: Arc<dyn Hook>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            trigger,
            priority,
            enabled: true,
            continue_on_error: true,
            handler,
        }
    }
}

impl fmt::Debug for RegisteredHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHook")
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_triggers_are_classified() {
        assert!(HookTrigger::PreTool.is_pre());
        assert!(HookTrigger::PreAgentLoop.is_pre());
        assert!(!HookTrigger::PostTool.is_pre());
        assert!(!HookTrigger::SessionEnd.is_pre());
        assert!(!HookTrigger::MaxIterations.is_pre());
    }

    #[test]
    fn trigger_display_is_snake_case() {
        assert_eq!(HookTrigger::PreTool.to_string(), "pre_tool");
        assert_eq!(HookTrigger::MaxIterations.to_string(), "max_iterations");
    }

    #[test]
    fn outcome_serializes_continue_field_name() {
        let json = serde_json::to_string(&HookOutcome::proceed()).unwrap();
        assert!(json.contains("\"continue\":true"));
    }

    #[test]
    fn cancel_outcome_carries_reason() {
        let o = HookOutcome::cancel("blocked by policy");
        assert!(o.success);
        assert!(!o.proceed);
        assert_eq!(o.error.as_deref(), Some("blocked by policy"));
    }

    #[test]
    fn tool_context_records_start_time() {
        let ctx = HookContext::for_tool("s1", "bash", "c1", serde_json::json!({}));
        assert!(ctx.started_at.is_some());
        assert_eq!(ctx.tool_name.as_deref(), Some("bash"));
    }
}

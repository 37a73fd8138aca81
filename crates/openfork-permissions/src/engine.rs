// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::pattern::{compile_pattern, extract_resource, permission_category};
use crate::prompt::{PromptOption, PromptRequest, PromptService};
use crate::rules::{merge_rulesets, PermissionAction, PermissionRule, Ruleset};

/// Priority given to remembered rules so they outrank agent-configured rules
/// under last-match evaluation.
const REMEMBERED_RULE_PRIORITY: i32 = 1_000;

/// Outcome of a permission check.
#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub action: PermissionAction,
    pub reason: Option<String>,
    pub matched_rule: Option<PermissionRule>,
    pub tool: String,
    pub resource: String,
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        self.action == PermissionAction::Allow
    }

    /// The denial string fed back to the model as a tool failure.
    pub fn denial_message(&self) -> String {
        match &self.reason {
            Some(reason) => format!("Permission denied: {reason}"),
            None => "Permission denied".to_string(),
        }
    }
}

/// How long a user's decision is remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RememberScope {
    /// This invocation only; no state change.
    ThisCall,
    /// Appended to the in-memory per-session rule list.
    ThisSession,
    /// Persisted to the durable rule store.
    Always,
}

/// Durable storage for rules remembered with [`RememberScope::Always`].
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn load(&self) -> Vec<PermissionRule>;
    async fn append(&self, rule: PermissionRule) -> anyhow::Result<()>;
}

/// In-memory rule store; the default when the embedder provides none.
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: tokio::sync::Mutex<Vec<PermissionRule>>,
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn load(&self) -> Vec<PermissionRule> {
        self.rules.lock().await.clone()
    }

    async fn append(&self, rule: PermissionRule) -> anyhow::Result<()> {
        self.rules.lock().await.push(rule);
        Ok(())
    }
}

/// Evaluates rulesets against tool invocations, remembers user decisions and
/// prompts when a rule says `Ask`.
pub struct PermissionEngine {
    durable: Arc<dyn RuleStore>,
    prompts: Arc<dyn PromptService>,
    session_rules: DashMap<String, Vec<PermissionRule>>,
}

impl PermissionEngine {
    pub fn new(durable: Arc<dyn RuleStore>, prompts: Arc<dyn PromptService>) -> Self {
        Self { durable, prompts, session_rules: DashMap::new() }
    }

    /// Pure last-match-wins evaluation of a single ruleset.
    ///
    /// Rules are ordered by ascending priority (stable) and the last match
    /// wins; no match falls back to the ruleset's default action.
    pub fn evaluate(ruleset: &Ruleset, tool: &str, resource: &str) -> PermissionDecision {
        let target = format!("{}:{}", permission_category(tool), resource);
        let mut ordered: Vec<&PermissionRule> = ruleset.rules.iter().collect();
        ordered.sort_by_key(|r| r.priority);

        let mut matched: Option<&PermissionRule> = None;
        for rule in ordered {
            if let Some(re) = compile_pattern(&rule.pattern) {
                if re.is_match(&target) {
                    matched = Some(rule);
                }
            }
        }

        match matched {
            Some(rule) => PermissionDecision {
                action: rule.action,
                reason: rule.reason.clone(),
                matched_rule: Some(rule.clone()),
                tool: tool.to_string(),
                resource: resource.to_string(),
            },
            None => PermissionDecision {
                action: ruleset.default_action,
                reason: None,
                matched_rule: None,
                tool: tool.to_string(),
                resource: resource.to_string(),
            },
        }
    }

    /// Full check for one tool call: merge the agent ruleset with remembered
    /// rules, evaluate, and prompt the user when the verdict is `Ask`.
    pub async fn check(
        &self,
        session_id: &str,
        agent_rules: &Ruleset,
        tool: &str,
        args: &serde_json::Value,
    ) -> PermissionDecision {
        let resource = extract_resource(tool, args);

        // Remembered rules inherit the agent's default so merging never
        // loosens it; canonical order: agent, durable, session.
        let durable = Ruleset {
            name: "remembered".into(),
            rules: self.durable.load().await,
            default_action: agent_rules.default_action,
        };
        let session = Ruleset {
            name: "session".into(),
            rules: self
                .session_rules
                .get(session_id)
                .map(|r| r.clone())
                .unwrap_or_default(),
            default_action: agent_rules.default_action,
        };
        let merged = merge_rulesets([agent_rules, &durable, &session]);

        let decision = Self::evaluate(&merged, tool, &resource);
        debug!(
            tool,
            resource = %decision.resource,
            action = ?decision.action,
            "permission evaluated"
        );
        if decision.action != PermissionAction::Ask {
            return decision;
        }

        self.ask_user(session_id, decision).await
    }

    async fn ask_user(&self, session_id: &str, decision: PermissionDecision) -> PermissionDecision {
        let request = PromptRequest {
            id: Uuid::new_v4().to_string(),
            title: "Permission Required".into(),
            message: format!(
                "Tool `{}` wants to access `{}`. Allow?",
                decision.tool, decision.resource
            ),
            options: vec![
                PromptOption::new("y", "allow this call"),
                PromptOption::new("n", "deny"),
                PromptOption::new("a", "always allow this pattern"),
                PromptOption::new("s", "allow for this session"),
            ],
            default_option: "n".into(),
            timeout_secs: None,
        };
        let response = self.prompts.prompt(request).await;

        if response.timed_out || response.cancelled {
            return PermissionDecision {
                action: PermissionAction::Deny,
                reason: Some(if response.timed_out {
                    "permission prompt timed out".into()
                } else {
                    "permission prompt cancelled".into()
                }),
                ..decision
            };
        }

        let scope = match response.option.as_str() {
            "y" => Some(RememberScope::ThisCall),
            "s" => Some(RememberScope::ThisSession),
            "a" => Some(RememberScope::Always),
            _ => None,
        };
        match scope {
            Some(scope) => {
                let rule = PermissionRule::new(
                    format!(
                        "{}:{}",
                        permission_category(&decision.tool),
                        decision.resource
                    ),
                    PermissionAction::Allow,
                    REMEMBERED_RULE_PRIORITY,
                );
                self.remember(scope, session_id, rule).await;
                PermissionDecision { action: PermissionAction::Allow, ..decision }
            }
            None => PermissionDecision {
                action: PermissionAction::Deny,
                reason: Some("denied by user".into()),
                ..decision
            },
        }
    }

    /// Record an allow decision at the requested scope.
    pub async fn remember(&self, scope: RememberScope, session_id: &str, rule: PermissionRule) {
        match scope {
            RememberScope::ThisCall => {}
            RememberScope::ThisSession => self.remember_for_session(session_id, rule),
            RememberScope::Always => {
                if let Err(e) = self.durable.append(rule).await {
                    tracing::warn!(error = %e, "failed to persist remembered rule");
                }
            }
        }
    }

    /// Append a session-scoped rule.
    pub fn remember_for_session(&self, session_id: &str, rule: PermissionRule) {
        self.session_rules
            .entry(session_id.to_string())
            .or_default()
            .push(rule);
    }

    /// Drop all rules remembered for a session (called on session end).
    pub fn clear_session(&self, session_id: &str) {
        self.session_rules.remove(session_id);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

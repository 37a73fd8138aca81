// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Read-only agent catalog.
//!
//! Agents are assembled once at startup from built-in definitions and
//! configuration entries, merged by slug (config wins), validated, and never
//! mutated afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use openfork_config::{AgentCategory, AgentEntry, ExecutionMode, ToolFilter};
use openfork_permissions::{PermissionAction, Ruleset};

pub mod builtin;

pub use builtin::builtin_agents;

/// One catalog entry: everything the loop needs to drive a model on behalf
/// of this agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub category: AgentCategory,
    pub provider_id: String,
    pub model_id: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
    pub execution_mode: ExecutionMode,
    /// 0 means unbounded.
    pub max_iterations: u32,
    /// 0 means unlimited concurrent instances.
    pub max_concurrent_instances: u32,
    pub can_spawn_subagents: bool,
    /// Empty means any registered subagent.
    pub allowed_subagent_slugs: Vec<String>,
    pub tool_filter: ToolFilter,
    pub permissions: Ruleset,
    pub visible: bool,
    pub display_order: i32,
}

impl AgentDefinition {
    fn from_entry(entry: AgentEntry) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: entry.name.unwrap_or_else(|| entry.slug.clone()),
            slug: entry.slug,
            category: entry.category,
            provider_id: entry.provider,
            model_id: entry.model,
            temperature: entry.temperature,
            max_tokens: entry.max_tokens,
            system_prompt: entry.system_prompt.unwrap_or_default(),
            execution_mode: entry.execution_mode,
            max_iterations: entry.max_iterations,
            max_concurrent_instances: entry.max_concurrent_instances,
            can_spawn_subagents: entry.can_spawn_subagents,
            allowed_subagent_slugs: entry.allowed_subagent_slugs,
            tool_filter: entry.tools,
            permissions: Ruleset {
                name: "agent".into(),
                rules: entry.rules,
                default_action: entry.default_action,
            },
            visible: entry.visible,
            display_order: entry.display_order,
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent `{0}` is not a subagent")]
    NotASubagent(String),

    #[error("agent `{parent}` may not spawn subagents")]
    SpawningForbidden { parent: String },

    #[error("agent `{parent}` is not authorized to spawn `{slug}`")]
    SubagentNotAllowed { parent: String, slug: String },

    #[error("subagent `{0}` must not be able to spawn subagents")]
    SubagentSpawns(String),
}

/// The catalog.  Exclusive owner of all [`AgentDefinition`]s; hands out
/// shared references only.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
}

impl AgentRegistry {
    /// Build from built-ins plus config entries.  Config entries override
    /// built-ins by slug; a duplicate slug inside the config keeps the later
    /// entry.  Invalid definitions fail construction.
    pub fn build(config_entries: Vec<AgentEntry>) -> Result<Self, CatalogError> {
        let mut agents: HashMap<String, Arc<AgentDefinition>> = HashMap::new();
        for agent in builtin_agents() {
            agents.insert(agent.slug.clone(), Arc::new(agent));
        }
        for entry in config_entries {
            let agent = AgentDefinition::from_entry(entry);
            if agents.contains_key(&agent.slug) {
                warn!(slug = %agent.slug, "config agent overrides existing definition");
            }
            agents.insert(agent.slug.clone(), Arc::new(agent));
        }

        for agent in agents.values() {
            if agent.category == AgentCategory::Subagent && agent.can_spawn_subagents {
                return Err(CatalogError::SubagentSpawns(agent.slug.clone()));
            }
        }

        Ok(Self { agents })
    }

    pub fn get(&self, slug: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(slug).cloned()
    }

    /// Every agent, hidden included, in display order.
    pub fn all(&self) -> Vec<Arc<AgentDefinition>> {
        let mut agents: Vec<Arc<AgentDefinition>> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.display_order.cmp(&b.display_order).then(a.slug.cmp(&b.slug)));
        agents
    }

    /// Agents enumerable to the user: hidden agents never appear.
    pub fn visible(&self) -> Vec<Arc<AgentDefinition>> {
        self.all()
            .into_iter()
            .filter(|a| a.visible && a.category != AgentCategory::Hidden)
            .collect()
    }

    /// Resolve and authorize a `task` spawn of `slug` on behalf of `parent`.
    pub fn authorize_subagent(
        &self,
        parent: &AgentDefinition,
        slug: &str,
    ) -> Result<Arc<AgentDefinition>, CatalogError> {
        if !parent.can_spawn_subagents {
            return Err(CatalogError::SpawningForbidden { parent: parent.slug.clone() });
        }
        let agent = self
            .get(slug)
            .ok_or_else(|| CatalogError::UnknownAgent(slug.to_string()))?;
        if agent.category != AgentCategory::Subagent {
            return Err(CatalogError::NotASubagent(slug.to_string()));
        }
        if !parent.allowed_subagent_slugs.is_empty()
            && !parent.allowed_subagent_slugs.iter().any(|s| s == slug)
        {
            return Err(CatalogError::SubagentNotAllowed {
                parent: parent.slug.clone(),
                slug: slug.to_string(),
            });
        }
        Ok(agent)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(slug: &str, category: AgentCategory) -> AgentEntry {
        AgentEntry {
            slug: slug.into(),
            name: None,
            category,
            provider: "mock".into(),
            model: "mock-model".into(),
            temperature: None,
            max_tokens: None,
            system_prompt: None,
            execution_mode: ExecutionMode::Agentic,
            max_iterations: 10,
            max_concurrent_instances: 0,
            can_spawn_subagents: category == AgentCategory::Primary,
            allowed_subagent_slugs: vec![],
            tools: ToolFilter::all(),
            rules: vec![],
            default_action: PermissionAction::Allow,
            visible: true,
            display_order: 0,
        }
    }

    #[test]
    fn builtins_are_present() {
        let reg = AgentRegistry::build(vec![]).unwrap();
        assert!(reg.get("general").is_some());
        assert!(reg.get("explore").is_some());
        assert!(reg.get("compactor").is_some());
    }

    #[test]
    fn config_overrides_builtin_by_slug() {
        let mut custom = entry("general", AgentCategory::Primary);
        custom.model = "custom-model".into();
        let reg = AgentRegistry::build(vec![custom]).unwrap();
        assert_eq!(reg.get("general").unwrap().model_id, "custom-model");
    }

    #[test]
    fn hidden_agents_are_never_enumerated() {
        let reg = AgentRegistry::build(vec![]).unwrap();
        assert!(reg.visible().iter().all(|a| a.slug != "compactor"));
        assert!(reg.all().iter().any(|a| a.slug == "compactor"));
    }

    #[test]
    fn subagent_that_spawns_is_rejected() {
        let mut bad = entry("rogue", AgentCategory::Subagent);
        bad.can_spawn_subagents = true;
        assert!(matches!(
            AgentRegistry::build(vec![bad]),
            Err(CatalogError::SubagentSpawns(_))
        ));
    }

    #[test]
    fn authorize_requires_subagent_category() {
        let reg = AgentRegistry::build(vec![entry("other", AgentCategory::Primary)]).unwrap();
        let parent = reg.get("general").unwrap();
        assert!(matches!(
            reg.authorize_subagent(&parent, "other"),
            Err(CatalogError::NotASubagent(_))
        ));
    }

    #[test]
    fn authorize_unknown_slug_fails() {
        let reg = AgentRegistry::build(vec![]).unwrap();
        let parent = reg.get("general").unwrap();
        assert!(matches!(
            reg.authorize_subagent(&parent, "ghost"),
            Err(CatalogError::UnknownAgent(_))
        ));
    }

    #[test]
    fn authorize_respects_allowed_list() {
        let mut parent_entry = entry("picky", AgentCategory::Primary);
        parent_entry.allowed_subagent_slugs = vec!["explore".into()];
        let mut other = entry("helper", AgentCategory::Subagent);
        other.can_spawn_subagents = false;
        let reg = AgentRegistry::build(vec![parent_entry, other]).unwrap();
        let parent = reg.get("picky").unwrap();

        assert!(reg.authorize_subagent(&parent, "explore").is_ok());
        assert!(matches!(
            reg.authorize_subagent(&parent, "helper"),
            Err(CatalogError::SubagentNotAllowed { .. })
        ));
    }

    #[test]
    fn empty_allowed_list_means_all() {
        let reg = AgentRegistry::build(vec![]).unwrap();
        let parent = reg.get("general").unwrap();
        assert!(reg.authorize_subagent(&parent, "explore").is_ok());
    }

    #[test]
    fn parent_without_spawn_capability_is_blocked() {
        let reg = AgentRegistry::build(vec![]).unwrap();
        let explore = reg.get("explore").unwrap();
        assert!(matches!(
            reg.authorize_subagent(&explore, "explore"),
            Err(CatalogError::SpawningForbidden { .. })
        ));
    }
}

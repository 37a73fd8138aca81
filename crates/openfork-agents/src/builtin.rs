// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use uuid::Uuid;

use openfork_config::{AgentCategory, ExecutionMode, ToolFilter, ToolFilterMode};
use openfork_permissions::Ruleset;

use crate::AgentDefinition;

const GENERAL_PROMPT: &str = "\
You are a capable software engineering assistant. Work through the user's \
request step by step, using the available tools to read, modify, and verify \
code. Delegate focused sub-tasks to subagents with the `task` tool when that \
keeps your own context small.";

const EXPLORE_PROMPT: &str = "\
You are a read-only exploration agent. Investigate the codebase to answer \
the given question. Do not modify anything. Report your findings as a \
concise summary with concrete file references.";

const COMPACTOR_PROMPT: &str = "\
You are a conversation summarization assistant. Produce dense, factual \
summaries that preserve decisions, file names, and open questions.";

/// Definitions shipped with the orchestrator.  Config entries may override
/// any of these by slug.
pub fn builtin_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            id: Uuid::new_v4().to_string(),
            slug: "general".into(),
            name: "General".into(),
            category: AgentCategory::Primary,
            provider_id: "openai".into(),
            model_id: "gpt-4o".into(),
            temperature: None,
            max_tokens: None,
            system_prompt: GENERAL_PROMPT.into(),
            execution_mode: ExecutionMode::Agentic,
            max_iterations: 50,
            max_concurrent_instances: 0,
            can_spawn_subagents: true,
            allowed_subagent_slugs: vec![],
            tool_filter: ToolFilter::all(),
            permissions: Ruleset::default(),
            visible: true,
            display_order: 0,
        },
        AgentDefinition {
            id: Uuid::new_v4().to_string(),
            slug: "explore".into(),
            name: "Explore".into(),
            category: AgentCategory::Subagent,
            provider_id: "openai".into(),
            model_id: "gpt-4o-mini".into(),
            temperature: None,
            max_tokens: None,
            system_prompt: EXPLORE_PROMPT.into(),
            execution_mode: ExecutionMode::Agentic,
            max_iterations: 25,
            max_concurrent_instances: 4,
            can_spawn_subagents: false,
            allowed_subagent_slugs: vec![],
            tool_filter: ToolFilter {
                mode: ToolFilterMode::OnlyThese,
                list: vec!["read".into(), "grep".into(), "glob".into(), "list".into()],
            },
            permissions: Ruleset::allow_all("explore"),
            visible: true,
            display_order: 10,
        },
        AgentDefinition {
            id: Uuid::new_v4().to_string(),
            slug: "compactor".into(),
            name: "Compactor".into(),
            category: AgentCategory::Hidden,
            provider_id: "openai".into(),
            model_id: "gpt-4o-mini".into(),
            temperature: Some(0.0),
            max_tokens: Some(2_000),
            system_prompt: COMPACTOR_PROMPT.into(),
            execution_mode: ExecutionMode::SingleShot,
            max_iterations: 1,
            max_concurrent_instances: 1,
            can_spawn_subagents: false,
            allowed_subagent_slugs: vec![],
            tool_filter: ToolFilter { mode: ToolFilterMode::None, list: vec![] },
            permissions: Ruleset::allow_all("compactor"),
            visible: false,
            display_order: 100,
        },
    ]
}

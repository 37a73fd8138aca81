// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod engine;
pub mod pattern;
pub mod prompt;
pub mod rules;

pub use engine::{InMemoryRuleStore, PermissionDecision, PermissionEngine, RememberScope, RuleStore};
pub use pattern::{compile_pattern, permission_category, extract_resource};
pub use prompt::{
    EventDrivenPromptService, PromptOption, PromptRequest, PromptResponse, PromptService,
    PromptSink, DEFAULT_PROMPT_TIMEOUT,
};
pub use rules::{merge_rulesets, PermissionAction, PermissionRule, Ruleset};

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use openfork_permissions::{PermissionAction, PermissionRule};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be enabled unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Root for orchestrator state (spill files live under `<data_dir>/spill`).
    /// Defaults to the platform data dir plus `openfork`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub spill: SpillConfig,
    /// Configured agents; merged over the built-in catalog by slug.
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

impl Config {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("openfork")
        })
    }

    pub fn spill_dir(&self) -> PathBuf {
        self.spill
            .dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("spill"))
    }
}

/// Which model performs conversation summarization.
///
/// Intentionally decoupled from the turn's agent model: summaries are cheap
/// work; the process default is injectable here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub provider: String,
    pub model: String,
    /// Fraction of the context window at which compaction fires.
    pub threshold: f32,
    /// Percentage of the window targeted after compaction.
    pub target_percent: u8,
    /// Cap on the generated summary.
    pub summary_max_tokens: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            threshold: 0.90,
            target_percent: 50,
            summary_max_tokens: 2_000,
        }
    }
}

/// Context-budget knobs shared by the token-manager layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Default context window when an agent's model does not specify one.
    pub context_window: usize,
    /// Output room reserved before pruning considers the window full.
    pub max_output_tokens: usize,
    /// Newest tokens that pruning must never touch.
    pub prune_protect_tokens: usize,
    /// Pruning stops once this many tokens were reclaimed.
    pub prune_minimum_tokens: usize,
    /// Leading characters kept from each pruned tool output.
    pub prune_retain_chars: usize,
    /// Fraction of the window at which pruning is attempted.
    pub prune_threshold: f32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            context_window: 128_000,
            max_output_tokens: 16_384,
            prune_protect_tokens: 40_000,
            prune_minimum_tokens: 20_000,
            prune_retain_chars: 2_000,
            prune_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory scanned for `*.tool.json` pipeline tools.
    #[serde(default)]
    pub pipeline_dir: Option<PathBuf>,
    /// Wall-clock budget for a single tool execution.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self { pipeline_dir: None, timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpillConfig {
    /// Override for the spill directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Age after which the cleanup operation removes spill files.  Cleanup is
    /// an explicit operation; nothing is enforced at write time.
    #[serde(default)]
    pub max_age_hours: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    Primary,
    Subagent,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Agentic,
    SingleShot,
    Streaming,
    Planning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFilterMode {
    #[default]
    All,
    AllExcept,
    OnlyThese,
    None,
}

/// Which tools an agent sees.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolFilter {
    #[serde(default)]
    pub mode: ToolFilterMode,
    #[serde(default)]
    pub list: Vec<String>,
}

impl ToolFilter {
    pub fn all() -> Self {
        Self { mode: ToolFilterMode::All, list: Vec::new() }
    }

    pub fn only(list: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode: ToolFilterMode::OnlyThese,
            list: list.into_iter().map(Into::into).collect(),
        }
    }
}

/// One configured agent.  Entries override built-in definitions by slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    pub category: AgentCategory,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_execution_mode")]
    pub execution_mode: ExecutionMode,
    /// 0 means unbounded.
    #[serde(default)]
    pub max_iterations: u32,
    /// 0 means unlimited concurrent instances.
    #[serde(default)]
    pub max_concurrent_instances: u32,
    #[serde(default = "default_true")]
    pub can_spawn_subagents: bool,
    /// Empty means any registered subagent.
    #[serde(default)]
    pub allowed_subagent_slugs: Vec<String>,
    #[serde(default)]
    pub tools: ToolFilter,
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
    #[serde(default = "default_action")]
    pub default_action: PermissionAction,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub display_order: i32,
}

fn default_execution_mode() -> ExecutionMode {
    ExecutionMode::Agentic
}

fn default_action() -> PermissionAction {
    PermissionAction::Ask
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

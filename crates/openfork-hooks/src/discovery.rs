// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Declarative hook discovery.
//!
//! Hooks can be declared on disk instead of in code.  Two files are read from
//! the project root, merged by id with the project-scoped file winning:
//!
//! ```text
//! <root>/.openfork/hooks.json    ← highest precedence
//! <root>/openfork.hooks.json
//! ```
//!
//! Each entry:
//!
//! ```json
//! {
//!   "id": "lint-gate",
//!   "name": "lint gate",
//!   "trigger": "pre_tool",
//!   "type": "command",
//!   "priority": 10,
//!   "enabled": true,
//!   "command": "./scripts/lint-gate.sh",
//!   "timeout": 30,
//!   "continue_on_error": true
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::handlers::{CommandHook, WebhookHook};
use crate::hook::{HookTrigger, RegisteredHook};

fn default_enabled() -> bool {
    true
}

fn default_continue_on_error() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    BuiltIn,
    Command,
    Webhook,
}

/// One declarative hook entry as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfigEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub trigger: HookTrigger,
    #[serde(rename = "type")]
    pub kind: HookKind,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Optional glob matched against the tool name (unused by non-tool triggers).
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_continue_on_error")]
    pub continue_on_error: bool,
}

impl HookConfigEntry {
    /// Build the executable hook.  Entries that reference a missing command
    /// or URL, or a built-in kind (wired in code, not on disk), yield `None`.
    pub fn into_registered(self) -> Option<RegisteredHook> {
        let timeout = Duration::from_secs(self.timeout);
        let handler: Arc<dyn crate::hook::Hook> = match self.kind {
            HookKind::Command => {
                let command = self.command.or_else(|| {
                    warn!(id = %self.id, "command hook without command; skipping");
                    None
                })?;
                Arc::new(CommandHook::new(command, timeout))
            }
            HookKind::Webhook => {
                let url = self.webhook_url.or_else(|| {
                    warn!(id = %self.id, "webhook hook without url; skipping");
                    None
                })?;
                Arc::new(WebhookHook::new(url, timeout))
            }
            HookKind::BuiltIn => return None,
        };

        let mut hook = RegisteredHook::new(
            self.name.unwrap_or_else(|| self.id.clone()),
            self.trigger,
            self.priority,
            handler,
        );
        hook.id = self.id;
        hook.enabled = self.enabled;
        hook.continue_on_error = self.continue_on_error;
        Some(hook)
    }
}

/// Read and merge the hook config files under `root`.
pub fn discover_hooks(root: &Path) -> Vec<HookConfigEntry> {
    let mut by_id: HashMap<String, HookConfigEntry> = HashMap::new();

    // Lowest precedence first so later inserts override.
    for file in [root.join("openfork.hooks.json"), root.join(".openfork/hooks.json")] {
        if !file.is_file() {
            continue;
        }
        let text = match std::fs::read_to_string(&file) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %file.display(), error = %e, "failed to read hooks file");
                continue;
            }
        };
        match serde_json::from_str::<Vec<HookConfigEntry>>(&text) {
            Ok(entries) => {
                for entry in entries {
                    by_id.insert(entry.id.clone(), entry);
                }
            }
            Err(e) => {
                warn!(path = %file.display(), error = %e, "failed to parse hooks file");
            }
        }
    }

    let mut entries: Vec<HookConfigEntry> = by_id.into_values().collect();
    entries.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
    entries
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, rel: &str, json: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, json).unwrap();
    }

    #[test]
    fn discovers_entries_from_both_files() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "openfork.hooks.json",
            r#"[{"id": "a", "trigger": "pre_tool", "type": "command", "command": "true"}]"#,
        );
        write(
            tmp.path(),
            ".openfork/hooks.json",
            r#"[{"id": "b", "trigger": "post_tool", "type": "command", "command": "true", "priority": 5}]"#,
        );

        let entries = discover_hooks(tmp.path());
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn project_file_overrides_root_file_by_id() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "openfork.hooks.json",
            r#"[{"id": "gate", "trigger": "pre_tool", "type": "command", "command": "echo root"}]"#,
        );
        write(
            tmp.path(),
            ".openfork/hooks.json",
            r#"[{"id": "gate", "trigger": "pre_tool", "type": "command", "command": "echo project"}]"#,
        );

        let entries = discover_hooks(tmp.path());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].command.as_deref(), Some("echo project"));
    }

    #[test]
    fn malformed_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), ".openfork/hooks.json", "not json");
        assert!(discover_hooks(tmp.path()).is_empty());
    }

    #[test]
    fn entry_defaults_apply() {
        let entry: HookConfigEntry = serde_json::from_str(
            r#"{"id": "x", "trigger": "session_start", "type": "command", "command": "true"}"#,
        )
        .unwrap();
        assert!(entry.enabled);
        assert!(entry.continue_on_error);
        assert_eq!(entry.timeout, 30);
        assert_eq!(entry.priority, 0);
    }

    #[test]
    fn command_entry_builds_registered_hook() {
        let entry: HookConfigEntry = serde_json::from_str(
            r#"{"id": "x", "trigger": "pre_tool", "type": "command", "command": "true", "priority": 7}"#,
        )
        .unwrap();
        let hook = entry.into_registered().unwrap();
        assert_eq!(hook.id, "x");
        assert_eq!(hook.priority, 7);
        assert_eq!(hook.trigger, HookTrigger::PreTool);
    }

    #[test]
    fn command_entry_without_command_is_dropped() {
        let entry: HookConfigEntry = serde_json::from_str(
            r#"{"id": "x", "trigger": "pre_tool", "type": "command"}"#,
        )
        .unwrap();
        assert!(entry.into_registered().is_none());
    }

    #[test]
    fn builtin_entries_are_not_instantiated_from_disk() {
        let entry: HookConfigEntry = serde_json::from_str(
            r#"{"id": "x", "trigger": "pre_tool", "type": "builtin"}"#,
        )
        .unwrap();
        assert!(entry.into_registered().is_none());
    }
}

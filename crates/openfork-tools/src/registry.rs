// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use openfork_config::{ToolFilter, ToolFilterMode};

use crate::tool::{Tool, ToolContext, ToolResult};

/// A tool schema – mirrors the model crate's definition shape but keeps this
/// crate independent from it.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Central registry holding all available tools.
///
/// Registration is append-only during startup: a second registration under
/// an existing name is rejected, never replaced.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "duplicate tool registration ignored");
            return;
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tools visible through `filter`, name-sorted for stable schemas.
    pub fn filtered(&self, filter: &ToolFilter) -> Vec<Arc<dyn Tool>> {
        let keep = |name: &str| match filter.mode {
            ToolFilterMode::All => true,
            ToolFilterMode::None => false,
            ToolFilterMode::OnlyThese => filter.list.iter().any(|n| n == name),
            ToolFilterMode::AllExcept => !filter.list.iter().any(|n| n == name),
        };
        let mut tools: Vec<Arc<dyn Tool>> = self
            .tools
            .values()
            .filter(|t| keep(t.name()))
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Schemas for the filtered view, in name order.
    pub fn schemas(&self, filter: &ToolFilter) -> Vec<ToolSchema> {
        self.filtered(filter)
            .into_iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => tool.execute(args, ctx).await,
            None => ToolResult::err(format!("unknown tool: {name}")),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::ok(format!("ran {}", self.0))
        }
    }

    fn registry(names: &[&'static str]) -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for n in names {
            reg.register(Named(n));
        }
        reg
    }

    #[test]
    fn register_and_get() {
        let reg = registry(&["read"]);
        assert!(reg.get("read").is_some());
        assert!(reg.get("write").is_none());
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        struct Described(&'static str, &'static str);
        #[async_trait]
        impl Tool for Described {
            fn name(&self) -> &str {
                self.0
            }
            fn description(&self) -> &str {
                self.1
            }
            fn parameters_schema(&self) -> Value {
                json!({})
            }
            async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
                ToolResult::ok("")
            }
        }

        let mut reg = ToolRegistry::new();
        reg.register(Described("t", "first"));
        reg.register(Described("t", "second"));
        assert_eq!(reg.get("t").unwrap().description(), "first");
    }

    #[test]
    fn filter_all_and_none() {
        let reg = registry(&["a", "b"]);
        assert_eq!(reg.filtered(&ToolFilter::all()).len(), 2);
        let none = ToolFilter { mode: ToolFilterMode::None, list: vec![] };
        assert!(reg.filtered(&none).is_empty());
    }

    #[test]
    fn filter_only_these() {
        let reg = registry(&["read", "write", "bash"]);
        let filter = ToolFilter::only(["read", "bash"]);
        let names: Vec<String> = reg
            .filtered(&filter)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["bash", "read"]);
    }

    #[test]
    fn filter_all_except() {
        let reg = registry(&["read", "write", "task"]);
        let filter = ToolFilter { mode: ToolFilterMode::AllExcept, list: vec!["task".into()] };
        let names: Vec<String> = reg
            .filtered(&filter)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["read", "write"]);
    }

    #[test]
    fn schemas_are_name_sorted() {
        let reg = registry(&["zeta", "alpha"]);
        let schemas = reg.schemas(&ToolFilter::all());
        assert_eq!(schemas[0].name, "alpha");
        assert_eq!(schemas[1].name, "zeta");
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_an_error_result() {
        let reg = registry(&[]);
        let out = reg.execute("ghost", json!({}), &ToolContext::default()).await;
        assert!(!out.success);
        assert!(out.output.contains("unknown tool"));
    }

    #[tokio::test]
    async fn execute_dispatches_by_name() {
        let reg = registry(&["read"]);
        let out = reg.execute("read", json!({}), &ToolContext::default()).await;
        assert!(out.success);
        assert_eq!(out.output, "ran read");
    }
}

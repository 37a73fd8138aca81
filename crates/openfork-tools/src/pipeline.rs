// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Declarative multi-step "pipeline tools".
//!
//! A pipeline tool is loaded from a `<name>.tool.json` file and surfaces to
//! the model as a single tool.  Its steps run sequentially; each step is
//! either an agent invocation (slug + prompt template) or a plain tool call
//! (name + arguments template).  Templates substitute `{{param}}` from the
//! caller's arguments plus the built-ins `{{_lastOutput}}` and
//! `{{_fullHistory}}`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::tool::{Tool, ToolContext, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Agent,
    Tool,
}

/// How much prior output a step sees prepended to its prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handoff {
    /// The concatenated history of all prior step outputs.
    Full,
    /// Only the immediately-previous step's output.
    Last,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    /// Prompt template (agent steps).
    #[serde(default)]
    pub prompt: Option<String>,
    /// Arguments template (tool steps); string values are template-expanded.
    #[serde(default)]
    pub arguments: Option<Value>,
    #[serde(default)]
    pub handoff: Handoff,
    #[serde(default)]
    pub name: Option<String>,
}

impl PipelineStep {
    fn label(&self, index: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let base = match self.kind {
            StepKind::Agent => format!("agent:{}", self.agent.as_deref().unwrap_or("?")),
            StepKind::Tool => format!("tool:{}", self.tool.as_deref().unwrap_or("?")),
        };
        format!("{base}#{index}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the caller-facing parameters.
    pub parameters: Value,
    pub pipeline: Vec<PipelineStep>,
}

/// Load every `*.tool.json` spec under `dir`.  Unreadable or malformed files
/// are skipped with a warning so one bad file cannot take down startup.
pub fn load_pipeline_specs(dir: &Path) -> Vec<PipelineToolSpec> {
    let mut specs = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return specs,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_tool_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".tool.json"))
            .unwrap_or(false);
        if !is_tool_file {
            continue;
        }
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read pipeline tool");
                continue;
            }
        };
        match serde_json::from_str::<PipelineToolSpec>(&text) {
            Ok(spec) => specs.push(spec),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to parse pipeline tool"),
        }
    }
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    specs
}

/// Substitute `{{param}}` placeholders from `args` plus the step built-ins.
pub fn render_template(template: &str, args: &Value, last_output: &str, full_history: &str) -> String {
    let mut out = template
        .replace("{{_lastOutput}}", last_output)
        .replace("{{_fullHistory}}", full_history);
    if let Some(map) = args.as_object() {
        for (key, value) in map {
            let placeholder = format!("{{{{{key}}}}}");
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&placeholder, &replacement);
        }
    }
    out
}

fn render_arguments(arguments: &Value, args: &Value, last: &str, history: &str) -> Value {
    match arguments {
        Value::String(s) => Value::String(render_template(s, args, last, history)),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| render_arguments(v, args, last, history)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_arguments(v, args, last, history)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Executes the two step kinds on behalf of a pipeline tool.  The core
/// provides an implementation backed by the subagent service and the tool
/// registry; tests provide fakes.
#[async_trait]
pub trait PipelineStepRunner: Send + Sync {
    async fn run_agent_step(
        &self,
        slug: &str,
        prompt: &str,
        ctx: &ToolContext,
    ) -> anyhow::Result<String>;

    async fn run_tool_step(
        &self,
        tool: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<String>;
}

/// A loaded pipeline spec surfaced as a single [`Tool`].
pub struct PipelineTool {
    spec: PipelineToolSpec,
    runner: Arc<dyn PipelineStepRunner>,
}

impl PipelineTool {
    pub fn new(spec: PipelineToolSpec, runner: Arc<dyn PipelineStepRunner>) -> Self {
        Self { spec, runner }
    }
}

#[async_trait]
impl Tool for PipelineTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        self.spec.parameters.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let mut history: Vec<(String, String)> = Vec::new();
        let mut last_output = String::new();
        let mut report: Vec<String> = Vec::new();

        for (index, step) in self.spec.pipeline.iter().enumerate() {
            let label = step.label(index);
            let full_history = history
                .iter()
                .map(|(l, o)| format!("[{l}]\n{o}"))
                .collect::<Vec<_>>()
                .join("\n\n");
            let prefix = match step.handoff {
                Handoff::Full => full_history.clone(),
                Handoff::Last => last_output.clone(),
                Handoff::None => String::new(),
            };

            let result = match step.kind {
                StepKind::Agent => {
                    let slug = step.agent.as_deref().unwrap_or_default();
                    let prompt = render_template(
                        step.prompt.as_deref().unwrap_or_default(),
                        &args,
                        &last_output,
                        &full_history,
                    );
                    let prompt = if prefix.is_empty() {
                        prompt
                    } else {
                        format!("{prefix}\n\n{prompt}")
                    };
                    self.runner.run_agent_step(slug, &prompt, ctx).await
                }
                StepKind::Tool => {
                    let tool = step.tool.as_deref().unwrap_or_default();
                    let rendered = render_arguments(
                        step.arguments.as_ref().unwrap_or(&Value::Null),
                        &args,
                        &last_output,
                        &full_history,
                    );
                    self.runner.run_tool_step(tool, rendered, ctx).await
                }
            };

            match result {
                Ok(output) => {
                    report.push(format!("step {index} ({label}): ok"));
                    last_output = output.clone();
                    history.push((label, output));
                }
                Err(e) => {
                    report.push(format!("step {index} ({label}): failed: {e}"));
                    return ToolResult::err(format!(
                        "pipeline `{}` failed at step {index} ({label}): {e}\n\n{}",
                        self.spec.name,
                        report.join("\n")
                    ));
                }
            }
        }

        ToolResult::ok(last_output)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    // ── Templates ─────────────────────────────────────────────────────────────

    #[test]
    fn template_substitutes_params_and_builtins() {
        let out = render_template(
            "analyze {{topic}} given {{_lastOutput}}",
            &json!({"topic": "latency"}),
            "previous findings",
            "",
        );
        assert_eq!(out, "analyze latency given previous findings");
    }

    #[test]
    fn template_non_string_params_are_json() {
        let out = render_template("n = {{count}}", &json!({"count": 3}), "", "");
        assert_eq!(out, "n = 3");
    }

    #[test]
    fn template_unknown_placeholder_is_left_alone() {
        let out = render_template("{{missing}}", &json!({}), "", "");
        assert_eq!(out, "{{missing}}");
    }

    // ── Loading ───────────────────────────────────────────────────────────────

    #[test]
    fn loads_only_tool_json_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("review.tool.json"),
            r#"{
                "name": "review",
                "description": "two-phase review",
                "parameters": { "type": "object" },
                "pipeline": [
                    { "type": "agent", "agent": "explore", "prompt": "look at {{target}}", "handoff": "none" },
                    { "type": "agent", "agent": "general", "prompt": "summarize", "handoff": "last" }
                ]
            }"#,
        )
        .unwrap();
        std::fs::write(tmp.path().join("notes.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("broken.tool.json"), "not json").unwrap();

        let specs = load_pipeline_specs(tmp.path());
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "review");
        assert_eq!(specs[0].pipeline.len(), 2);
        assert_eq!(specs[0].pipeline[1].handoff, Handoff::Last);
    }

    #[test]
    fn missing_dir_yields_no_specs() {
        assert!(load_pipeline_specs(Path::new("/nonexistent/of-tools")).is_empty());
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    struct FakeRunner {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl FakeRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: Mutex::new(Vec::new()), fail_on: None })
        }

        fn failing_on(tool: &'static str) -> Arc<Self> {
            Arc::new(Self { calls: Mutex::new(Vec::new()), fail_on: Some(tool) })
        }
    }

    #[async_trait]
    impl PipelineStepRunner for FakeRunner {
        async fn run_agent_step(
            &self,
            slug: &str,
            prompt: &str,
            _ctx: &ToolContext,
        ) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(format!("agent {slug}: {prompt}"));
            Ok(format!("out<{slug}>"))
        }

        async fn run_tool_step(
            &self,
            tool: &str,
            args: Value,
            _ctx: &ToolContext,
        ) -> anyhow::Result<String> {
            if self.fail_on == Some(tool) {
                anyhow::bail!("{tool} exploded");
            }
            self.calls.lock().unwrap().push(format!("tool {tool}: {args}"));
            Ok(format!("out<{tool}>"))
        }
    }

    fn spec(steps: Vec<PipelineStep>) -> PipelineToolSpec {
        PipelineToolSpec {
            name: "pipe".into(),
            description: "test pipeline".into(),
            parameters: json!({"type": "object"}),
            pipeline: steps,
        }
    }

    fn agent_step(slug: &str, prompt: &str, handoff: Handoff) -> PipelineStep {
        PipelineStep {
            kind: StepKind::Agent,
            agent: Some(slug.into()),
            tool: None,
            prompt: Some(prompt.into()),
            arguments: None,
            handoff,
            name: None,
        }
    }

    fn tool_step(tool: &str, arguments: Value) -> PipelineStep {
        PipelineStep {
            kind: StepKind::Tool,
            agent: None,
            tool: Some(tool.into()),
            prompt: None,
            arguments: Some(arguments),
            handoff: Handoff::None,
            name: None,
        }
    }

    #[tokio::test]
    async fn steps_run_sequentially_and_return_last_output() {
        let runner = FakeRunner::new();
        let tool = PipelineTool::new(
            spec(vec![
                agent_step("explore", "find {{topic}}", Handoff::None),
                agent_step("general", "conclude", Handoff::Last),
            ]),
            runner.clone(),
        );
        let out = tool
            .execute(json!({"topic": "caching"}), &ToolContext::default())
            .await;
        assert!(out.success);
        assert_eq!(out.output, "out<general>");

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], "agent explore: find caching");
        // handoff=last prepends the previous step's output
        assert!(calls[1].starts_with("agent general: out<explore>"));
    }

    #[tokio::test]
    async fn full_handoff_prepends_entire_history() {
        let runner = FakeRunner::new();
        let tool = PipelineTool::new(
            spec(vec![
                agent_step("a", "one", Handoff::None),
                agent_step("b", "two", Handoff::None),
                agent_step("c", "three", Handoff::Full),
            ]),
            runner.clone(),
        );
        assert!(tool.execute(json!({}), &ToolContext::default()).await.success);
        let calls = runner.calls.lock().unwrap();
        let third = &calls[2];
        assert!(third.contains("out<a>"));
        assert!(third.contains("out<b>"));
    }

    #[tokio::test]
    async fn tool_step_arguments_are_template_expanded() {
        let runner = FakeRunner::new();
        let tool = PipelineTool::new(
            spec(vec![
                agent_step("a", "one", Handoff::None),
                tool_step("write", json!({"path": "{{dest}}", "content": "{{_lastOutput}}"})),
            ]),
            runner.clone(),
        );
        assert!(tool
            .execute(json!({"dest": "/tmp/x"}), &ToolContext::default())
            .await
            .success);
        let calls = runner.calls.lock().unwrap();
        assert!(calls[1].contains(r#""path":"/tmp/x""#));
        assert!(calls[1].contains(r#""content":"out<a>""#));
    }

    #[tokio::test]
    async fn step_failure_stops_pipeline_with_report() {
        let runner = FakeRunner::failing_on("write");
        let tool = PipelineTool::new(
            spec(vec![
                agent_step("a", "one", Handoff::None),
                tool_step("write", json!({})),
                agent_step("never", "unreached", Handoff::None),
            ]),
            runner.clone(),
        );
        let out = tool.execute(json!({}), &ToolContext::default()).await;
        assert!(!out.success);
        assert!(out.output.contains("failed at step 1"));
        assert!(out.output.contains("step 0 (agent:a#0): ok"));
        // the step after the failure never ran
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }
}

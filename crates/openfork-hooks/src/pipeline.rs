// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use tracing::{debug, warn};

use crate::hook::{HookContext, HookOutcome, HookTrigger, RegisteredHook};

/// How a pipeline run ended.
#[derive(Debug)]
pub struct PipelineResult {
    /// Context after all modifications and data merges.
    pub context: HookContext,
    /// Set when a Pre-trigger hook vetoed the action; carries its reason.
    pub aborted: Option<String>,
    /// Per-hook outcomes in execution order.
    pub outcomes: Vec<(String, HookOutcome)>,
}

impl PipelineResult {
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

/// Ordered hook execution around orchestrator actions.
#[derive(Debug, Default)]
pub struct HookPipeline {
    hooks: Vec<RegisteredHook>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: RegisteredHook) {
        self.hooks.push(hook);
    }

    pub fn hooks_for(&self, trigger: HookTrigger) -> Vec<&RegisteredHook> {
        let mut hooks: Vec<&RegisteredHook> = self
            .hooks
            .iter()
            .filter(|h| h.trigger == trigger && h.enabled)
            .collect();
        hooks.sort_by_key(|h| h.priority);
        hooks
    }

    /// Run all hooks for `trigger` in ascending priority order.
    ///
    /// Each hook sees the context as left by its predecessors: a returned
    /// `modified_context` replaces it, returned `data` merges into its bag.
    /// On a Pre-trigger, `continue = false` stops the remaining hooks and
    /// signals the caller to abort the guarded action; on Post-triggers a
    /// non-continue is recorded but changes nothing.  A hook error stops the
    /// pipeline only when that hook was registered with
    /// `continue_on_error = false`.
    pub async fn run(&self, trigger: HookTrigger, context: HookContext) -> PipelineResult {
        let mut context = context;
        let mut outcomes = Vec::new();
        let mut aborted = None;

        for hook in self.hooks_for(trigger) {
            let outcome = match hook.handler.run(&context).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(hook = %hook.name, error = %e, "hook failed");
                    HookOutcome::failed(e.to_string())
                }
            };

            if let Some(modified) = &outcome.modified_context {
                context = modified.clone();
            }
            if let Some(data) = &outcome.data {
                context.data.extend(data.clone());
            }

            let stop_on_error = !outcome.success && !hook.continue_on_error;
            let vetoed = trigger.is_pre() && !outcome.proceed;
            if vetoed {
                debug!(hook = %hook.name, trigger = %trigger, "pre-hook vetoed action");
                aborted = Some(
                    outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("cancelled by hook {}", hook.name)),
                );
            }

            outcomes.push((hook.name.clone(), outcome));

            if vetoed || stop_on_error {
                break;
            }
        }

        PipelineResult { context, aborted, outcomes }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::hook::Hook;

    /// Hook that records its execution order and returns a fixed outcome.
    struct Probe {
        order: Arc<std::sync::Mutex<Vec<String>>>,
        label: String,
        outcome: fn() -> HookOutcome,
    }

    #[async_trait]
    impl Hook for Probe {
        async fn run(&self, _context: &HookContext) -> anyhow::Result<HookOutcome> {
            self.order.lock().unwrap().push(self.label.clone());
            Ok((self.outcome)())
        }
    }

    fn probe(
        order: &Arc<std::sync::Mutex<Vec<String>>>,
        label: &str,
        outcome: fn() -> HookOutcome,
    ) -> Arc<Probe> {
        Arc::new(Probe { order: order.clone(), label: label.into(), outcome })
    }

    #[tokio::test]
    async fn hooks_run_in_ascending_priority_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        pipeline.register(RegisteredHook::new(
            "second",
            HookTrigger::PostTool,
            20,
            probe(&order, "second", HookOutcome::proceed),
        ));
        pipeline.register(RegisteredHook::new(
            "first",
            HookTrigger::PostTool,
            10,
            probe(&order, "first", HookOutcome::proceed),
        ));

        pipeline.run(HookTrigger::PostTool, HookContext::default()).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn pre_trigger_cancel_stops_pipeline_and_aborts() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        pipeline.register(RegisteredHook::new(
            "gate",
            HookTrigger::PreTool,
            1,
            probe(&order, "gate", || HookOutcome::cancel("nope")),
        ));
        pipeline.register(RegisteredHook::new(
            "late",
            HookTrigger::PreTool,
            2,
            probe(&order, "late", HookOutcome::proceed),
        ));

        let result = pipeline.run(HookTrigger::PreTool, HookContext::default()).await;
        assert_eq!(result.aborted.as_deref(), Some("nope"));
        assert_eq!(*order.lock().unwrap(), vec!["gate"]);
    }

    #[tokio::test]
    async fn post_trigger_non_continue_does_not_abort() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        pipeline.register(RegisteredHook::new(
            "observer",
            HookTrigger::PostTool,
            1,
            probe(&order, "observer", || HookOutcome::cancel("ignored")),
        ));
        pipeline.register(RegisteredHook::new(
            "late",
            HookTrigger::PostTool,
            2,
            probe(&order, "late", HookOutcome::proceed),
        ));

        let result = pipeline.run(HookTrigger::PostTool, HookContext::default()).await;
        assert!(!result.is_aborted());
        assert_eq!(*order.lock().unwrap(), vec!["observer", "late"]);
    }

    #[tokio::test]
    async fn data_merges_between_hooks() {
        struct Writer;
        #[async_trait]
        impl Hook for Writer {
            async fn run(&self, _context: &HookContext) -> anyhow::Result<HookOutcome> {
                Ok(HookOutcome::proceed().with_data("flag", json!(true)))
            }
        }

        struct Reader {
            saw: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl Hook for Reader {
            async fn run(&self, context: &HookContext) -> anyhow::Result<HookOutcome> {
                if context.data.get("flag") == Some(&json!(true)) {
                    self.saw.fetch_add(1, Ordering::SeqCst);
                }
                Ok(HookOutcome::proceed())
            }
        }

        let saw = Arc::new(AtomicUsize::new(0));
        let mut pipeline = HookPipeline::new();
        pipeline.register(RegisteredHook::new("w", HookTrigger::PreTool, 1, Arc::new(Writer)));
        pipeline.register(RegisteredHook::new(
            "r",
            HookTrigger::PreTool,
            2,
            Arc::new(Reader { saw: saw.clone() }),
        ));

        let result = pipeline.run(HookTrigger::PreTool, HookContext::default()).await;
        assert!(!result.is_aborted());
        assert_eq!(saw.load(Ordering::SeqCst), 1);
        assert_eq!(result.context.data.get("flag"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn erroring_hook_continues_by_default() {
        struct Boom;
        #[async_trait]
        impl Hook for Boom {
            async fn run(&self, _context: &HookContext) -> anyhow::Result<HookOutcome> {
                anyhow::bail!("kaput")
            }
        }

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        pipeline.register(RegisteredHook::new("boom", HookTrigger::PostTool, 1, Arc::new(Boom)));
        pipeline.register(RegisteredHook::new(
            "after",
            HookTrigger::PostTool,
            2,
            probe(&order, "after", HookOutcome::proceed),
        ));

        let result = pipeline.run(HookTrigger::PostTool, HookContext::default()).await;
        assert!(!result.is_aborted());
        assert_eq!(*order.lock().unwrap(), vec!["after"]);
        assert!(!result.outcomes[0].1.success);
    }

    #[tokio::test]
    async fn erroring_hook_with_continue_on_error_false_stops() {
        struct Boom;
        #[async_trait]
        impl Hook for Boom {
            async fn run(&self, _context: &HookContext) -> anyhow::Result<HookOutcome> {
                anyhow::bail!("kaput")
            }
        }

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        let mut strict = RegisteredHook::new("boom", HookTrigger::PostTool, 1, Arc::new(Boom));
        strict.continue_on_error = false;
        pipeline.register(strict);
        pipeline.register(RegisteredHook::new(
            "after",
            HookTrigger::PostTool,
            2,
            probe(&order, "after", HookOutcome::proceed),
        ));

        pipeline.run(HookTrigger::PostTool, HookContext::default()).await;
        assert!(order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_hooks_are_skipped() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut pipeline = HookPipeline::new();
        let mut off = RegisteredHook::new(
            "off",
            HookTrigger::PreTool,
            1,
            probe(&order, "off", HookOutcome::proceed),
        );
        off.enabled = false;
        pipeline.register(off);

        pipeline.run(HookTrigger::PreTool, HookContext::default()).await;
        assert!(order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn modified_context_replaces_current() {
        struct Renamer;
        #[async_trait]
        impl Hook for Renamer {
            async fn run(&self, context: &HookContext) -> anyhow::Result<HookOutcome> {
                let mut modified = context.clone();
                modified.tool_name = Some("renamed".into());
                Ok(HookOutcome { modified_context: Some(modified), ..HookOutcome::proceed() })
            }
        }

        let mut pipeline = HookPipeline::new();
        pipeline.register(RegisteredHook::new("rn", HookTrigger::PreTool, 1, Arc::new(Renamer)));
        let ctx = HookContext::for_tool("s1", "bash", "c1", json!({}));
        let result = pipeline.run(HookTrigger::PreTool, ctx).await;
        assert_eq!(result.context.tool_name.as_deref(), Some("renamed"));
    }
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use openfork_agents::AgentDefinition;
use openfork_context::compact::COMPACTION_THRESHOLD;
use openfork_context::{estimate_request, truncate_tool_output, Compactor, ContextManager};
use openfork_events::{EventBus, OrchestratorEvent};
use openfork_hooks::{HookContext, HookPipeline, HookTrigger};
use openfork_model::{
    ChatRequest, ProviderResolver, ToolCallRequest, ToolDefinition, WireMessage,
};
use openfork_permissions::PermissionEngine;
use openfork_store::{MessageRecord, MessageRepository, MessageRole, NewMessage, Session};
use openfork_tools::{ToolContext, ToolRegistry};

use crate::assemble::ToolCallAssembler;
use crate::retry::RetryPolicy;

/// Synthetic user message that resumes a cut-off response.
pub const CONTINUATION_PROMPT: &str =
    "Your response was cut off. Please continue from where you left off.";

/// Updates streamed to the caller while a turn runs.  `Done` is emitted
/// exactly once per completed turn.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    TextDelta(String),
    ToolStarted {
        call_id: String,
        tool_name: String,
    },
    /// One tool call finished; carries the original arguments and the
    /// (possibly truncated) output.
    ToolFinished {
        call_id: String,
        tool_name: String,
        arguments: Value,
        output: String,
        success: bool,
    },
    Warning(String),
    Done,
}

/// One user turn to run.
pub struct TurnRequest {
    pub session: Session,
    pub agent: Arc<AgentDefinition>,
    pub user_input: String,
    pub working_dir: PathBuf,
    pub tools: Arc<ToolRegistry>,
    pub tx: mpsc::Sender<TurnEvent>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub output: String,
    pub iterations: u32,
    pub hit_iteration_cap: bool,
    pub cancelled: bool,
}

/// Everything the loop needs besides the per-turn request.
pub struct LoopDeps {
    pub resolver: Arc<dyn ProviderResolver>,
    pub messages: Arc<dyn MessageRepository>,
    pub permissions: Arc<PermissionEngine>,
    pub hooks: Arc<HookPipeline>,
    pub context: Arc<ContextManager>,
    pub compactor: Arc<Compactor>,
    pub events: Arc<EventBus>,
    pub retry: RetryPolicy,
    pub spill_dir: PathBuf,
}

enum StreamEnd {
    Completed(StreamedTurn),
    Cancelled,
}

struct StreamedTurn {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
    finish_reason: Option<String>,
}

/// The bounded iterative driver: stream a model response, execute the tool
/// calls it requested, feed results back, repeat until the model stops
/// calling tools or the iteration cap is hit.
pub struct AgentLoop {
    deps: LoopDeps,
}

impl AgentLoop {
    pub fn new(deps: LoopDeps) -> Self {
        Self { deps }
    }

    /// Run one user turn to completion.
    ///
    /// Tool calls within an iteration execute sequentially in the order the
    /// model emitted them.  Tool, permission, and hook failures never escape
    /// this boundary; provider failures do once the retry budget is spent.
    pub async fn run_turn(&self, req: &TurnRequest) -> anyhow::Result<TurnOutcome> {
        let agent = &req.agent;
        let provider = self
            .deps
            .resolver
            .resolve(&agent.provider_id, &agent.model_id)?;
        let context_limit = self
            .deps
            .resolver
            .resolve_model(&agent.model_id)
            .map(|(_, info)| info.context_window as usize)
            .unwrap_or(self.deps.context.limits().context_window);

        let pre_loop = self
            .deps
            .hooks
            .run(
                HookTrigger::PreAgentLoop,
                HookContext::for_session(&req.session.id),
            )
            .await;
        if let Some(reason) = pre_loop.aborted {
            let _ = req.tx.send(TurnEvent::Warning(format!("turn aborted: {reason}"))).await;
            let _ = req.tx.send(TurnEvent::Done).await;
            return Ok(TurnOutcome::default());
        }

        self.deps
            .messages
            .append_message(NewMessage::text(
                &req.session.id,
                MessageRole::User,
                &req.user_input,
            ))
            .await?;

        let defs = tool_definitions(agent, &req.tools);
        let mut outcome = TurnOutcome::default();
        let mut continuations = 0u32;

        loop {
            if req.cancel.is_cancelled() {
                outcome.cancelled = true;
                return Ok(outcome);
            }

            outcome.iterations += 1;
            if agent.max_iterations > 0 && outcome.iterations > agent.max_iterations {
                outcome.iterations -= 1;
                outcome.hit_iteration_cap = true;
                let _ = req
                    .tx
                    .send(TurnEvent::Warning(format!(
                        "maximum iterations ({}) reached; returning partial output",
                        agent.max_iterations
                    )))
                    .await;
                self.deps
                    .hooks
                    .run(HookTrigger::MaxIterations, HookContext::for_session(&req.session.id))
                    .await;
                let _ = req.tx.send(TurnEvent::Done).await;
                return Ok(outcome);
            }

            let wire = self.assemble_request(req, &defs, context_limit).await?;
            let request = ChatRequest {
                model: agent.model_id.clone(),
                messages: wire,
                tools: defs.clone(),
                stream: true,
                max_tokens: agent.max_tokens,
                temperature: agent.temperature,
            };

            let turn = match self.stream_turn(provider.as_ref(), request, req).await? {
                StreamEnd::Cancelled => {
                    // Abandon the in-flight assistant message entirely.
                    outcome.cancelled = true;
                    return Ok(outcome);
                }
                StreamEnd::Completed(turn) => turn,
            };

            // A cut-off response is committed as-is and resumed with a
            // synthetic user prompt; this does not consume an iteration but
            // draws on the retry budget.  Shape checks run on the turn's
            // accumulated text so a continuation that closes an earlier fence
            // is recognized as complete.
            let accumulated = format!("{}{}", outcome.output, turn.text);
            if turn.tool_calls.is_empty()
                && looks_truncated(turn.finish_reason.as_deref(), &accumulated)
                && continuations < self.deps.retry.max_attempts
            {
                continuations += 1;
                outcome.iterations -= 1;
                outcome.output.push_str(&turn.text);
                self.deps
                    .messages
                    .append_message(NewMessage::text(
                        &req.session.id,
                        MessageRole::Assistant,
                        &turn.text,
                    ))
                    .await?;
                self.deps
                    .messages
                    .append_message(NewMessage::text(
                        &req.session.id,
                        MessageRole::User,
                        CONTINUATION_PROMPT,
                    ))
                    .await?;
                debug!(continuations, "response truncated; continuing");
                continue;
            }

            if turn.tool_calls.is_empty() {
                if !turn.text.is_empty() {
                    outcome.output.push_str(&turn.text);
                    self.deps
                        .messages
                        .append_message(NewMessage::text(
                            &req.session.id,
                            MessageRole::Assistant,
                            &turn.text,
                        ))
                        .await?;
                }
                self.deps
                    .hooks
                    .run(HookTrigger::PostAgentLoop, HookContext::for_session(&req.session.id))
                    .await;
                let _ = req.tx.send(TurnEvent::Done).await;
                return Ok(outcome);
            }

            outcome.output.push_str(&turn.text);
            let assistant = self
                .deps
                .messages
                .append_message(NewMessage {
                    session_id: req.session.id.clone(),
                    role: MessageRole::Assistant,
                    content: turn.text.clone(),
                    tool_calls: Some(serde_json::to_string(&turn.tool_calls)?),
                    tool_call_id: None,
                })
                .await?;

            for call in &turn.tool_calls {
                if req.cancel.is_cancelled() {
                    outcome.cancelled = true;
                    return Ok(outcome);
                }
                self.run_tool_call(req, call, assistant.id).await?;
            }
        }
    }

    /// Load history (past any compaction boundary), apply the preflight token
    /// gates, and return the wire messages for this iteration.
    async fn assemble_request(
        &self,
        req: &TurnRequest,
        defs: &[ToolDefinition],
        context_limit: usize,
    ) -> anyhow::Result<Vec<WireMessage>> {
        let mut history = self
            .deps
            .compactor
            .load_messages_with_boundary(&req.session.id)
            .await?;
        let mut wire = wire_from_records(&req.agent.system_prompt, &history);
        let mut estimate = estimate_request(&wire, defs);

        let prune_at =
            (context_limit as f32 * self.deps.context.limits().prune_threshold) as usize;
        if estimate >= prune_at {
            self.deps
                .context
                .prune_session(&req.session.id, estimate, context_limit)
                .await?;
            history = self
                .deps
                .compactor
                .load_messages_with_boundary(&req.session.id)
                .await?;
            wire = wire_from_records(&req.agent.system_prompt, &history);
            estimate = estimate_request(&wire, defs);

            let compact_at = (context_limit as f32 * COMPACTION_THRESHOLD) as usize;
            if estimate >= compact_at {
                self.deps
                    .compactor
                    .maybe_compact(&req.session.id, estimate, context_limit)
                    .await?;
                history = self
                    .deps
                    .compactor
                    .load_messages_with_boundary(&req.session.id)
                    .await?;
                wire = wire_from_records(&req.agent.system_prompt, &history);
            }
        }

        Ok(wire)
    }

    /// One streamed model call with retry.  Every attempt starts with fresh
    /// buffers, so the committed message reflects only the successful one.
    async fn stream_turn(
        &self,
        provider: &dyn openfork_model::ChatProvider,
        request: ChatRequest,
        req: &TurnRequest,
    ) -> anyhow::Result<StreamEnd> {
        let mut attempt = 1u32;
        'attempts: loop {
            let mut stream = match provider.stream_chat(request.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    if self.deps.retry.is_retryable(&e.to_string())
                        && attempt < self.deps.retry.max_attempts
                    {
                        let delay = self.deps.retry.delay_for(attempt);
                        warn!(attempt, error = %e, ?delay, "provider call failed; retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue 'attempts;
                    }
                    return Err(e.context("model completion failed"));
                }
            };

            let mut text = String::new();
            let mut assembler = ToolCallAssembler::new();
            let mut finish_reason = None;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = req.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                    next = stream.next() => next,
                };
                let chunk = match next {
                    None => break,
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        if self.deps.retry.is_retryable(&e.to_string())
                            && attempt < self.deps.retry.max_attempts
                        {
                            let delay = self.deps.retry.delay_for(attempt);
                            warn!(attempt, error = %e, ?delay, "stream failed; retrying");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            // Per-attempt buffers are dropped here so the
                            // retried attempt starts clean.
                            continue 'attempts;
                        }
                        return Err(e.context("model stream failed"));
                    }
                };

                if let Some(delta) = chunk.content {
                    if !delta.is_empty() {
                        text.push_str(&delta);
                        let _ = req.tx.send(TurnEvent::TextDelta(delta)).await;
                    }
                }
                if let Some(deltas) = chunk.tool_calls {
                    for delta in &deltas {
                        assembler.push(delta);
                    }
                }
                if let Some(reason) = chunk.finish_reason {
                    finish_reason = Some(reason);
                }
            }

            return Ok(StreamEnd::Completed(StreamedTurn {
                text,
                tool_calls: assembler.finish(),
                finish_reason,
            }));
        }
    }

    /// Permission gate, hook chain, execution, truncation, and commit for a
    /// single tool call.
    async fn run_tool_call(
        &self,
        req: &TurnRequest,
        call: &ToolCallRequest,
        assistant_message_id: i64,
    ) -> anyhow::Result<()> {
        let _ = req
            .tx
            .send(TurnEvent::ToolStarted {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
            })
            .await;

        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "invalid tool-call arguments; substituting {{}}");
                Value::Object(Default::default())
            }
        };

        let decision = self
            .deps
            .permissions
            .check(&req.session.id, &req.agent.permissions, &call.name, &args)
            .await;
        if !decision.is_allowed() {
            let output = decision.denial_message();
            return self.finish_tool_call(req, call, &args, output, false).await;
        }

        let pre = self
            .deps
            .hooks
            .run(
                HookTrigger::PreTool,
                HookContext::for_tool(&req.session.id, &call.name, &call.id, args.clone()),
            )
            .await;
        if let Some(reason) = pre.aborted {
            let output = format!("Tool execution cancelled: {reason}");
            return self.finish_tool_call(req, call, &args, output, false).await;
        }

        // Pre-hooks may rewrite the input; the executed arguments come from
        // the (possibly modified) hook context.
        let effective_args = pre.context.tool_input.clone().unwrap_or_else(|| args.clone());
        let tool_ctx = ToolContext::new(&req.session.id, &req.working_dir)
            .with_call_id(&call.id)
            .with_message_id(assistant_message_id)
            .with_cancel(req.cancel.clone());
        let started = std::time::Instant::now();
        // Tool execution is a cancellable suspension point: the same race as
        // the chunk stream in `stream_turn`.  An abandoned call commits no
        // result message; the iteration loop observes the token next.
        let result = tokio::select! {
            biased;
            _ = req.cancel.cancelled() => {
                debug!(tool = %call.name, call_id = %call.id, "tool call abandoned by cancellation");
                return Ok(());
            }
            result = req.tools.execute(&call.name, effective_args, &tool_ctx) => result,
        };

        let mut post_ctx = pre.context;
        post_ctx.tool_output = Some(result.output.clone());
        post_ctx.duration_ms = Some(started.elapsed().as_millis() as u64);
        if !result.success {
            post_ctx.error = Some(result.output.clone());
        }
        self.deps.hooks.run(HookTrigger::PostTool, post_ctx).await;

        let truncated = truncate_tool_output(
            &result.output,
            &call.name,
            &self.deps.spill_dir,
            None,
        )?;

        self.finish_tool_call(req, call, &args, truncated.output, result.success)
            .await
    }

    async fn finish_tool_call(
        &self,
        req: &TurnRequest,
        call: &ToolCallRequest,
        args: &Value,
        output: String,
        success: bool,
    ) -> anyhow::Result<()> {
        self.deps
            .messages
            .append_message(NewMessage::tool_result(&req.session.id, &call.id, &output))
            .await?;
        let _ = req
            .tx
            .send(TurnEvent::ToolFinished {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: args.clone(),
                output,
                success,
            })
            .await;
        self.deps.events.publish(OrchestratorEvent::ToolExecuted {
            session_id: req.session.id.clone(),
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success,
        });
        Ok(())
    }
}

/// Agent-visible tool definitions: the agent's filter applied to the
/// registry, with `task` withheld from agents that may not spawn subagents.
pub fn tool_definitions(agent: &AgentDefinition, registry: &ToolRegistry) -> Vec<ToolDefinition> {
    let mut schemas = registry.schemas(&agent.tool_filter);
    if !agent.can_spawn_subagents {
        schemas.retain(|s| s.name != "task");
    }
    schemas
        .into_iter()
        .map(|s| ToolDefinition {
            name: s.name,
            description: s.description,
            parameters: s.parameters,
        })
        .collect()
}

fn wire_from_records(system_prompt: &str, records: &[MessageRecord]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(records.len() + 1);
    if !system_prompt.is_empty() {
        wire.push(WireMessage::system(system_prompt));
    }
    for record in records {
        let message = match record.role {
            MessageRole::System => WireMessage::system(&record.content),
            MessageRole::User => WireMessage::user(&record.content),
            MessageRole::Assistant => {
                let calls = record
                    .tool_calls
                    .as_deref()
                    .and_then(|t| serde_json::from_str::<Vec<ToolCallRequest>>(t).ok());
                match calls {
                    Some(calls) => WireMessage::assistant_tool_calls(&record.content, calls),
                    None => WireMessage::assistant(&record.content),
                }
            }
            MessageRole::Tool => WireMessage::tool_result(
                record.tool_call_id.clone().unwrap_or_default(),
                &record.content,
            ),
        };
        wire.push(message);
    }
    wire
}

/// Detect a response the model did not get to finish: an explicit
/// length-style finish reason, an unclosed fenced code block, or clearly
/// unbalanced bracket groups.
fn looks_truncated(finish_reason: Option<&str>, text: &str) -> bool {
    if matches!(finish_reason, Some("length" | "max_tokens" | "max_output_tokens")) {
        return true;
    }
    if text.matches("```").count() % 2 == 1 {
        return true;
    }
    let opens = text.chars().filter(|c| matches!(c, '{' | '[')).count();
    let closes = text.chars().filter(|c| matches!(c, '}' | ']')).count();
    opens > closes + 2
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use openfork_agents::{AgentRegistry, CatalogError};
use openfork_events::{EventBus, OrchestratorEvent};
use openfork_store::{
    MessageId, ProjectRepository, Session, SessionRepository, StoreError, SubSession,
    SubSessionRepository, SubSessionStatus,
};
use openfork_tools::{PipelineStepRunner, Tool, ToolContext, ToolRegistry, ToolResult};

use crate::agent::{AgentLoop, TurnEvent, TurnOutcome, TurnRequest};
use crate::concurrency::ConcurrencyManager;

/// Late-bound reference to the service, breaking the construction cycle
/// between the tool registry (which holds `task`) and the service (which
/// needs the registry to run subagents).
pub type SubagentHandle = Arc<RwLock<Option<Arc<SubagentService>>>>;

#[derive(Debug, Error)]
pub enum SubagentError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("subagent execution failed: {0}")]
    Execution(String),
}

/// Creates, throttles, and executes child agent sessions.
pub struct SubagentService {
    agents: Arc<AgentRegistry>,
    sessions: Arc<dyn SessionRepository>,
    projects: Arc<dyn ProjectRepository>,
    subsessions: Arc<dyn SubSessionRepository>,
    tools: Arc<ToolRegistry>,
    agent_loop: Arc<AgentLoop>,
    concurrency: Arc<ConcurrencyManager>,
    events: Arc<EventBus>,
}

impl SubagentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<AgentRegistry>,
        sessions: Arc<dyn SessionRepository>,
        projects: Arc<dyn ProjectRepository>,
        subsessions: Arc<dyn SubSessionRepository>,
        tools: Arc<ToolRegistry>,
        agent_loop: Arc<AgentLoop>,
        concurrency: Arc<ConcurrencyManager>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            agents,
            sessions,
            projects,
            subsessions,
            tools,
            agent_loop,
            concurrency,
            events,
        })
    }

    pub fn concurrency(&self) -> &ConcurrencyManager {
        &self.concurrency
    }

    /// Create a `Pending` subsession after resolving and authorizing the
    /// requested slug against the parent's agent.
    pub async fn create(
        &self,
        parent_session_id: &str,
        parent_message_id: MessageId,
        slug: &str,
        prompt: &str,
        description: &str,
        max_iterations: u32,
    ) -> Result<SubSession, SubagentError> {
        let parent = self.sessions.get_session(parent_session_id).await?;
        let parent_agent = self
            .agents
            .get(&parent.agent_slug)
            .ok_or_else(|| CatalogError::UnknownAgent(parent.agent_slug.clone()))?;
        let agent = self.agents.authorize_subagent(&parent_agent, slug)?;

        let sub = SubSession {
            id: Uuid::new_v4().to_string(),
            parent_session_id: parent_session_id.to_string(),
            parent_message_id,
            agent_slug: slug.to_string(),
            status: SubSessionStatus::Pending,
            prompt: prompt.to_string(),
            description: description.to_string(),
            result: None,
            error: None,
            max_iterations: effective_iterations(max_iterations, agent.max_iterations),
            iterations_used: 0,
            // Parent-session remembered rules deliberately do not leak down:
            // the child runs under the subagent's own default ruleset.
            effective_permissions: agent.permissions.clone(),
            created_at: Utc::now(),
            completed_at: None,
        };
        self.subsessions.create_subsession(sub.clone()).await?;
        self.events.publish(OrchestratorEvent::SubSessionCreated {
            subsession_id: sub.id.clone(),
            parent_session_id: parent_session_id.to_string(),
            agent_slug: slug.to_string(),
        });
        Ok(sub)
    }

    /// Run a created subsession to a terminal state.
    ///
    /// Acquires a per-slug slot first, moving through `Queued` when the slug
    /// is at capacity; the FIFO wait observes `cancel`.  The slot is released
    /// by a drop guard on every exit path, which wakes the next queued
    /// execution of the same slug.
    pub async fn execute(
        &self,
        subsession_id: &str,
        cancel: CancellationToken,
    ) -> Result<SubSession, SubagentError> {
        let mut sub = self.subsessions.get_subsession(subsession_id).await?;
        let agent = self
            .agents
            .get(&sub.agent_slug)
            .ok_or_else(|| CatalogError::UnknownAgent(sub.agent_slug.clone()))?;
        let capacity = agent.max_concurrent_instances as usize;

        // Held to the end of this scope: releasing only after the terminal
        // status is persisted and published keeps the event order
        // `Completed(A)` before `StatusChanged(B, Queued→Running)`.
        let _slot = match self.concurrency.try_acquire(&sub.agent_slug, capacity) {
            Some(slot) => slot,
            None => {
                self.transition(&mut sub, SubSessionStatus::Queued).await?;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.finish_cancelled(&mut sub, "cancelled while queued").await?;
                        return Ok(sub);
                    }
                    slot = self.concurrency.acquire(&sub.agent_slug, capacity) => {
                        slot.map_err(|e| SubagentError::Execution(e.to_string()))?
                    }
                }
            }
        };
        self.transition(&mut sub, SubSessionStatus::Running).await?;

        let mut bounded = (*agent).clone();
        bounded.max_iterations = sub.max_iterations;
        let outcome = self.run_under_slot(&sub, Arc::new(bounded), cancel).await;

        match outcome {
            Ok(turn) if turn.cancelled => {
                sub.iterations_used = turn.iterations;
                self.finish_cancelled(&mut sub, "cancelled during execution").await?;
            }
            Ok(turn) => {
                sub.iterations_used = turn.iterations;
                sub.result = Some(turn.output);
                sub.status = SubSessionStatus::Completed;
                sub.completed_at = Some(Utc::now());
                self.subsessions.update_subsession(sub.clone()).await?;
                self.events.publish(OrchestratorEvent::SubSessionCompleted {
                    subsession_id: sub.id.clone(),
                    result: sub.result.clone().unwrap_or_default(),
                });
            }
            Err(e) => {
                sub.error = Some(e.to_string());
                sub.status = SubSessionStatus::Failed;
                sub.completed_at = Some(Utc::now());
                self.subsessions.update_subsession(sub.clone()).await?;
                self.events.publish(OrchestratorEvent::SubSessionFailed {
                    subsession_id: sub.id.clone(),
                    error: e.to_string(),
                });
            }
        }
        Ok(sub)
    }

    /// Cancel a non-terminal subsession.  Terminal states are left alone.
    pub async fn cancel(&self, subsession_id: &str, reason: &str) -> Result<(), SubagentError> {
        let mut sub = self.subsessions.get_subsession(subsession_id).await?;
        if sub.status.is_terminal() {
            return Ok(());
        }
        self.finish_cancelled(&mut sub, reason).await
    }

    async fn run_under_slot(
        &self,
        sub: &SubSession,
        agent: Arc<openfork_agents::AgentDefinition>,
        cancel: CancellationToken,
    ) -> anyhow::Result<TurnOutcome> {
        let parent = self.sessions.get_session(&sub.parent_session_id).await?;
        let working_dir = match self.projects.get_project(&parent.project_id).await {
            Ok(project) => project.working_dir,
            Err(_) => PathBuf::from("."),
        };

        let child = Session::new(parent.project_id.clone(), sub.agent_slug.clone());
        self.sessions.create_session(child.clone()).await?;
        debug!(subsession = %sub.id, child_session = %child.id, "running subagent");

        let (tx, rx) = mpsc::channel::<TurnEvent>(256);
        let forward = tokio::spawn(forward_progress(self.events.clone(), sub.id.clone(), rx));

        let request = TurnRequest {
            session: child,
            agent,
            user_input: sub.prompt.clone(),
            working_dir,
            tools: Arc::clone(&self.tools),
            tx,
            cancel,
        };
        let outcome = self.agent_loop.run_turn(&request).await;
        drop(request);
        let _ = forward.await;
        outcome
    }

    async fn transition(
        &self,
        sub: &mut SubSession,
        to: SubSessionStatus,
    ) -> Result<(), SubagentError> {
        let from = sub.status;
        sub.status = to;
        self.subsessions.update_subsession(sub.clone()).await?;
        self.events.publish(OrchestratorEvent::SubSessionStatusChanged {
            subsession_id: sub.id.clone(),
            from,
            to,
        });
        Ok(())
    }

    async fn finish_cancelled(
        &self,
        sub: &mut SubSession,
        reason: &str,
    ) -> Result<(), SubagentError> {
        sub.status = SubSessionStatus::Cancelled;
        sub.error = Some(reason.to_string());
        sub.completed_at = Some(Utc::now());
        self.subsessions.update_subsession(sub.clone()).await?;
        self.events.publish(OrchestratorEvent::SubSessionCancelled {
            subsession_id: sub.id.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// The agent's own cap always binds; a zero request inherits it outright.
fn effective_iterations(requested: u32, agent_cap: u32) -> u32 {
    match (requested, agent_cap) {
        (0, cap) => cap,
        (req, 0) => req,
        (req, cap) => req.min(cap),
    }
}

async fn forward_progress(
    events: Arc<EventBus>,
    subsession_id: String,
    mut rx: mpsc::Receiver<TurnEvent>,
) {
    while let Some(event) = rx.recv().await {
        let (part_type, content) = match event {
            TurnEvent::TextDelta(text) => ("text", text),
            TurnEvent::ToolFinished { tool_name, success, .. } => (
                "tool",
                format!("{tool_name}: {}", if success { "ok" } else { "error" }),
            ),
            TurnEvent::Warning(text) => ("warning", text),
            _ => continue,
        };
        events.publish(OrchestratorEvent::SubSessionProgress {
            subsession_id: subsession_id.clone(),
            part_type: part_type.to_string(),
            content,
        });
    }
}

// ─── task tool ───────────────────────────────────────────────────────────────

/// The `task` tool: the model's entry point into the subagent service.
pub struct TaskTool {
    service: SubagentHandle,
}

impl TaskTool {
    pub fn new(service: SubagentHandle) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a focused task to a subagent and return its final output. \
         The subagent runs with its own tool set and permissions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subagent_type": {
                    "type": "string",
                    "description": "Slug of the subagent to run"
                },
                "prompt": {
                    "type": "string",
                    "description": "The task for the subagent"
                },
                "description": {
                    "type": "string",
                    "description": "Short human-readable label"
                },
                "max_iterations": {
                    "type": "integer",
                    "description": "Iteration cap (0 = the subagent's own cap)"
                }
            },
            "required": ["subagent_type", "prompt"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(service) = self.service.read().await.clone() else {
            return ToolResult::err("subagent service not initialized");
        };
        let Some(slug) = args.get("subagent_type").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'subagent_type'");
        };
        let Some(prompt) = args.get("prompt").and_then(|v| v.as_str()) else {
            return ToolResult::err("missing 'prompt'");
        };
        let description = args.get("description").and_then(|v| v.as_str()).unwrap_or("");
        let max_iterations = args
            .get("max_iterations")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        let sub = match service
            .create(
                &ctx.session_id,
                ctx.message_id.unwrap_or(0),
                slug,
                prompt,
                description,
                max_iterations,
            )
            .await
        {
            Ok(sub) => sub,
            Err(e) => return ToolResult::err(format!("cannot spawn subagent: {e}")),
        };

        // The turn's own token: cancelling the parent turn must reach the
        // child, including a child still parked on a slug-capacity slot.
        match service.execute(&sub.id, ctx.cancel.clone()).await {
            Ok(done) => match done.status {
                SubSessionStatus::Completed => {
                    let result = done.result.unwrap_or_default();
                    if result.is_empty() {
                        ToolResult::ok("(subagent produced no text output)")
                    } else {
                        ToolResult::ok(result)
                    }
                }
                SubSessionStatus::Cancelled => ToolResult::err(format!(
                    "subagent cancelled: {}",
                    done.error.unwrap_or_default()
                )),
                _ => ToolResult::err(format!(
                    "subagent failed: {}",
                    done.error.unwrap_or_default()
                )),
            },
            Err(e) => ToolResult::err(format!("subagent error: {e}")),
        }
    }
}

// ─── pipeline step runner ────────────────────────────────────────────────────

/// Pipeline-tool step execution backed by the subagent service and the tool
/// registry.
pub struct SubagentStepRunner {
    service: SubagentHandle,
    tools: Arc<ToolRegistry>,
}

impl SubagentStepRunner {
    pub fn new(service: SubagentHandle, tools: Arc<ToolRegistry>) -> Self {
        Self { service, tools }
    }
}

#[async_trait]
impl PipelineStepRunner for SubagentStepRunner {
    async fn run_agent_step(
        &self,
        slug: &str,
        prompt: &str,
        ctx: &ToolContext,
    ) -> anyhow::Result<String> {
        let Some(service) = self.service.read().await.clone() else {
            anyhow::bail!("subagent service not initialized");
        };
        let sub = service
            .create(&ctx.session_id, ctx.message_id.unwrap_or(0), slug, prompt, "", 0)
            .await?;
        let done = service.execute(&sub.id, ctx.cancel.clone()).await?;
        match done.status {
            SubSessionStatus::Completed => Ok(done.result.unwrap_or_default()),
            _ => {
                let error = done.error.unwrap_or_else(|| "unknown failure".into());
                warn!(slug, error = %error, "pipeline agent step failed");
                anyhow::bail!("agent step `{slug}` failed: {error}")
            }
        }
    }

    async fn run_tool_step(
        &self,
        tool: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<String> {
        let result = self.tools.execute(tool, args, ctx).await;
        if result.success {
            Ok(result.output)
        } else {
            anyhow::bail!("tool step `{tool}` failed: {}", result.output)
        }
    }
}

//! Drives a provider delegate and the tool registry until the agent is done.
//!
//! Each turn: call the model, run the tool calls it asked for, append one
//! result per call, repeat. The run ends on a `done` call, after the first
//! round in one-shot mode, or with an [`AgentError`].

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, MAX_TURNS_PER_TASK};
use crate::conversation::{Conversation, ToolCall, ToolResult};
use crate::engine::Context;
use crate::error::AgentError;
use crate::provider::ProviderDelegate;
use crate::tools::ToolRegistry;

/// Progress notifications published while a task runs.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { turn: usize },
    Step { number: usize, description: String },
    StepError { message: String },
    TaskComplete { summary: String },
    TaskError { message: String },
    Ready,
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::Step { .. } => "step",
            AgentEvent::StepError { .. } => "step_error",
            AgentEvent::TaskComplete { .. } => "task_complete",
            AgentEvent::TaskError { .. } => "task_error",
            AgentEvent::Ready => "ready",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub one_shot: bool,
    pub max_turns: usize,
    pub transcript_path: Option<PathBuf>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            one_shot: false,
            max_turns: MAX_TURNS_PER_TASK,
            transcript_path: None,
        }
    }
}

impl From<&Config> for LoopOptions {
    fn from(config: &Config) -> Self {
        Self {
            one_shot: config.one_shot,
            max_turns: config.max_turns,
            transcript_path: config.transcript_path.clone(),
        }
    }
}

pub struct AgentLoop {
    delegate: Arc<dyn ProviderDelegate>,
    registry: ToolRegistry,
    context: Arc<Context>,
    options: LoopOptions,
    events: Option<broadcast::Sender<AgentEvent>>,
    cancel: CancellationToken,
}

impl AgentLoop {
    pub fn new(
        delegate: Arc<dyn ProviderDelegate>,
        registry: ToolRegistry,
        context: Arc<Context>,
        options: LoopOptions,
    ) -> Self {
        Self {
            delegate,
            registry,
            context,
            options,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// The token is checked between turns only; a running tool round always
    /// completes and has its results appended first.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine.
            let _ = events.send(event);
        }
    }

    pub async fn run(&self, task: &str) -> Result<String, AgentError> {
        info!(
            provider = self.delegate.name(),
            one_shot = self.options.one_shot,
            "starting task: {}",
            task
        );
        let outcome = self.run_turns(task).await;
        match &outcome {
            Ok(summary) => {
                info!("task complete: {}", summary);
                self.emit(AgentEvent::TaskComplete {
                    summary: summary.clone(),
                });
            }
            Err(e) => {
                error!("task failed: {}", e);
                self.emit(AgentEvent::TaskError {
                    message: e.to_string(),
                });
            }
        }
        self.emit(AgentEvent::Ready);
        outcome
    }

    async fn run_turns(&self, task: &str) -> Result<String, AgentError> {
        let mut conversation = self.delegate.create_conversation(
            task,
            self.registry.descriptors(),
            self.options.one_shot,
        );
        let mut steps = 0;

        for turn in 1..=self.options.max_turns {
            if self.cancel.is_cancelled() {
                return Err(AgentError::Cancelled { turn });
            }
            let missing = conversation.pending_tool_call_ids();
            if !missing.is_empty() {
                return Err(AgentError::PendingToolResults { missing });
            }

            self.emit(AgentEvent::Thinking { turn });
            let calls = self
                .delegate
                .make_api_call(&mut conversation)
                .await
                .map_err(|source| AgentError::Provider {
                    turn,
                    collected_results: conversation.tool_result_count(),
                    source,
                })?;
            self.persist(&conversation);

            if calls.is_empty() {
                if conversation.is_one_shot() {
                    return Ok(conversation.last_assistant_text().unwrap_or_default().to_string());
                }
                return Err(AgentError::Stalled { turn });
            }

            let done_at = calls
                .iter()
                .position(|call| self.delegate.check_done(call).is_some());
            let runnable = &calls[..done_at.unwrap_or(calls.len())];
            let results = self.execute_calls(runnable, &mut steps).await;

            if let Some(idx) = done_at {
                return Ok(self.delegate.check_done(&calls[idx]).unwrap_or_default());
            }

            let last_output = results.last().map(|r| r.content.clone());
            self.delegate.add_tool_results(&mut conversation, results);
            self.persist(&conversation);

            if conversation.is_one_shot() {
                let text = conversation.last_assistant_text().unwrap_or_default();
                if !text.is_empty() {
                    return Ok(text.to_string());
                }
                return Ok(last_output.unwrap_or_default());
            }
        }

        warn!(max_turns = self.options.max_turns, "turn limit reached");
        Err(AgentError::TurnLimit {
            max_turns: self.options.max_turns,
        })
    }

    /// Runs sibling calls concurrently. Results come back in call order.
    async fn execute_calls(&self, calls: &[ToolCall], steps: &mut usize) -> Vec<ToolResult> {
        for call in calls {
            *steps += 1;
            let description = format!("{} {}", call.name, call.arguments);
            info!(step = *steps, "{}", description);
            self.emit(AgentEvent::Step {
                number: *steps,
                description,
            });
        }

        let ctx = self.context.as_ref();
        let outputs = join_all(calls.iter().map(|call| {
            self.registry
                .execute(ctx, &call.name, call.arguments.clone())
        }))
        .await;

        calls
            .iter()
            .zip(outputs)
            .map(|(call, output)| {
                if output.is_error {
                    warn!(tool = %call.name, "tool reported an error");
                    self.emit(AgentEvent::StepError {
                        message: format!("{} failed", call.name),
                    });
                }
                ToolResult {
                    tool_call_id: call.id.clone(),
                    content: output.text(),
                    is_error: output.is_error,
                }
            })
            .collect()
    }

    fn persist(&self, conversation: &Conversation) {
        if let Some(path) = &self.options.transcript_path {
            if let Err(e) = conversation.save(path) {
                warn!("failed to save transcript: {:#}", e);
            }
        }
    }
}

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use quill_llm::{
    ChatResponse, LlmError, ManagedCompletion, Message, MessagePart, ProviderManager,
    ToolDefinition,
};
use quill_tools::{ToolCall, ToolRegistry, ToolResult};

use crate::config::{AgentConfig, ToolDecision};
use crate::context::ContextTracker;
use crate::cost::CostTracker;
use crate::event::{AgentEvent, EventKind, EventTx, emit};
use crate::parser;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced a final text answer.
    Completed,
    /// The iteration cap was reached before a final answer.
    MaxIterations,
    /// An iteration exceeded its time budget.
    Timeout,
    /// The caller cancelled the run.
    Cancelled,
    /// An unrecoverable error (provider chain exhausted, budget spent).
    Fatal,
}

#[derive(Debug)]
pub struct AgentOutcome {
    pub success: bool,
    pub final_response: Option<String>,
    pub iterations: usize,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub stop_reason: StopReason,
    pub error: Option<String>,
    /// Every event the run produced, in order. The same events stream live
    /// through the channel set with [`AgentLoop::with_events`].
    pub events: Vec<AgentEvent>,
}

/// Callback deciding whether an approval-gated tool call may run.
pub type ApprovalFn = Box<dyn Fn(&ToolCall) -> bool + Send + Sync>;

/// Owned outcome of one provider round trip, so the borrow on the provider
/// chain ends before the stop-reason handling starts.
enum LlmStep {
    Cancelled,
    TimedOut,
    Failed(LlmError),
    Done(ManagedCompletion),
}

/// The iterate-until-answer loop: ask the model, run any tools it requests,
/// feed the results back, repeat. Tool calls within one response run
/// sequentially in the order the model produced them, so later calls can
/// depend on earlier effects.
pub struct AgentLoop {
    manager: ProviderManager,
    registry: ToolRegistry,
    config: AgentConfig,
    context: ContextTracker,
    cost: CostTracker,
    system_prompt: Option<String>,
    history: Vec<Message>,
    events: Option<EventTx>,
    approval: Option<ApprovalFn>,
    cancel: CancellationToken,
}

impl AgentLoop {
    #[must_use]
    pub fn new(manager: ProviderManager, registry: ToolRegistry, config: AgentConfig) -> Self {
        let window = manager.primary_context_window().unwrap_or(8192);
        Self {
            manager,
            registry,
            config,
            context: ContextTracker::new("").with_max_tokens(window),
            cost: CostTracker::new(false, 0.0),
            system_prompt: None,
            history: Vec::new(),
            events: None,
            approval: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Seed prior conversation turns, sent ahead of the next query so a
    /// multi-turn session can resume. Consumed by the next [`run`] call.
    ///
    /// [`run`]: AgentLoop::run
    #[must_use]
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ContextTracker) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_cost_tracker(mut self, cost: CostTracker) -> Self {
        self.cost = cost;
        self
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventTx) -> Self {
        self.events = Some(tx);
        self
    }

    #[must_use]
    pub fn with_approval(mut self, approval: ApprovalFn) -> Self {
        self.approval = Some(approval);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        if !self.config.enable_tools {
            return Vec::new();
        }
        self.registry
            .specs()
            .into_iter()
            .map(|spec| ToolDefinition {
                name: spec.name,
                description: spec.description,
                parameters: spec.input_schema,
            })
            .collect()
    }

    fn emit_event(&self, log: &mut Vec<AgentEvent>, event: AgentEvent) {
        emit(self.events.as_ref(), event.clone());
        log.push(event);
    }

    /// Drive one user query to completion.
    pub async fn run(&mut self, query: &str) -> AgentOutcome {
        let cancel = self.cancel.clone();
        let mut log: Vec<AgentEvent> = Vec::new();
        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            self.context.set_system_prompt(prompt);
            messages.push(Message::system(prompt.clone()));
        }
        for turn in std::mem::take(&mut self.history) {
            self.context.add_turn(&turn);
            messages.push(turn);
        }
        let user_msg = Message::user(query);
        self.context.add_turn(&user_msg);
        messages.push(user_msg);

        let tools = self.tool_definitions();
        let iteration_timeout = Duration::from_secs(self.config.iteration_timeout_secs);

        let mut all_calls: Vec<ToolCall> = Vec::new();
        let mut all_results: Vec<ToolResult> = Vec::new();
        let mut last_text: Option<String> = None;

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return self.finish(
                    StopReason::Cancelled,
                    iteration - 1,
                    last_text,
                    all_calls,
                    all_results,
                    Some("run cancelled".into()),
                    log,
                );
            }

            self.emit_event(&mut log, AgentEvent::new(EventKind::IterationStart, iteration));

            if let Err(e) = self.cost.check_budget() {
                self.emit_event(
                    &mut log,
                    AgentEvent::new(EventKind::Error, iteration).with_message(e.to_string()),
                );
                return self.finish(
                    StopReason::Fatal,
                    iteration,
                    last_text,
                    all_calls,
                    all_results,
                    Some(e.to_string()),
                    log,
                );
            }

            let usage = self.context.usage();
            if usage.needs_handoff() {
                // Session-state snapshot so an observer can start a fresh
                // session from where this one stands.
                self.emit_event(
                    &mut log,
                    AgentEvent::new(EventKind::ContextWarning, iteration)
                        .with_message(format!(
                            "context {:.0}% full, past handoff threshold",
                            usage.percent_used() * 100.0
                        ))
                        .with_data(serde_json::json!({
                            "tokens_used": usage.current_tokens,
                            "max_tokens": usage.max_tokens,
                            "iterations": iteration,
                            "tool_calls": all_calls.len(),
                            "spent_cents": self.cost.current_spend(),
                        })),
                );
            } else if usage.needs_compaction() {
                let dropped = self.compact(&mut messages);
                let message = if dropped == 0 {
                    format!(
                        "context {:.0}% full, nothing safe to compact",
                        usage.percent_used() * 100.0
                    )
                } else {
                    format!(
                        "context {:.0}% full, dropped {dropped} oldest turns",
                        usage.percent_used() * 100.0
                    )
                };
                self.emit_event(
                    &mut log,
                    AgentEvent::new(EventKind::ContextWarning, iteration).with_message(message),
                );
            }

            self.emit_event(&mut log, AgentEvent::new(EventKind::LlmRequest, iteration));

            let step = tokio::select! {
                () = cancel.cancelled() => LlmStep::Cancelled,
                outcome = tokio::time::timeout(
                    iteration_timeout,
                    self.manager.complete(&messages, &tools),
                ) => match outcome {
                    Err(_) => LlmStep::TimedOut,
                    Ok(Err(e)) => LlmStep::Failed(e),
                    Ok(Ok(managed)) => LlmStep::Done(managed),
                },
            };

            let completion = match step {
                LlmStep::Cancelled => {
                    return self.finish(
                        StopReason::Cancelled,
                        iteration,
                        last_text,
                        all_calls,
                        all_results,
                        Some("run cancelled".into()),
                        log,
                    );
                }
                LlmStep::TimedOut => {
                    let error = format!(
                        "iteration timed out after {}s",
                        self.config.iteration_timeout_secs
                    );
                    self.emit_event(
                        &mut log,
                        AgentEvent::new(EventKind::Error, iteration).with_message(error.clone()),
                    );
                    return self.finish(
                        StopReason::Timeout,
                        iteration,
                        last_text,
                        all_calls,
                        all_results,
                        Some(error),
                        log,
                    );
                }
                LlmStep::Failed(e) => {
                    self.emit_event(
                        &mut log,
                        AgentEvent::new(EventKind::Error, iteration).with_message(e.to_string()),
                    );
                    return self.finish(
                        StopReason::Fatal,
                        iteration,
                        last_text,
                        all_calls,
                        all_results,
                        Some(e.to_string()),
                        log,
                    );
                }
                LlmStep::Done(managed) => managed,
            };

            for attempt in &completion.fallback_attempts {
                self.emit_event(
                    &mut log,
                    AgentEvent::new(EventKind::ProviderFallback, iteration)
                        .with_message(format!("{} failed: {}", attempt.provider, attempt.error))
                        .with_data(serde_json::json!({
                            "provider": attempt.provider,
                            "kind": attempt.kind.as_str(),
                        })),
                );
            }

            if let Some(usage) = completion.completion.usage {
                self.cost.record_usage(&completion.model, usage);
            }

            let response = completion.completion.response;
            last_text = response.text().map(str::to_owned);
            self.emit_event(
                &mut log,
                AgentEvent::new(EventKind::LlmResponse, iteration)
                    .with_message(last_text.clone().unwrap_or_default())
                    .with_data(serde_json::json!({
                        "provider": completion.provider,
                        "tool_calls": response.tool_calls().len(),
                    })),
            );

            let calls = parser::parse_tool_calls(&response);
            if calls.is_empty() {
                self.emit_event(&mut log, AgentEvent::new(EventKind::Complete, iteration));
                return AgentOutcome {
                    success: true,
                    final_response: last_text,
                    iterations: iteration,
                    tool_calls: all_calls,
                    tool_results: all_results,
                    stop_reason: StopReason::Completed,
                    error: None,
                    events: log,
                };
            }

            let assistant_msg = assistant_turn(&response);
            self.context.add_turn(&assistant_msg);
            messages.push(assistant_msg);

            let mut result_parts = Vec::with_capacity(calls.len());
            for call in calls {
                if cancel.is_cancelled() {
                    return self.finish(
                        StopReason::Cancelled,
                        iteration,
                        last_text,
                        all_calls,
                        all_results,
                        Some("run cancelled".into()),
                        log,
                    );
                }
                self.emit_event(
                    &mut log,
                    AgentEvent::new(EventKind::ToolCall, iteration)
                        .with_tool(call.name.clone(), call.id.clone())
                        .with_data(serde_json::Value::Object(call.input.clone())),
                );

                let result = self.run_tool(&call, iteration, &mut log).await;

                self.emit_event(
                    &mut log,
                    AgentEvent::new(EventKind::ToolResult, iteration)
                        .with_tool(call.name.clone(), call.id.clone())
                        .with_message(if result.is_error {
                            result.error.clone().unwrap_or_default()
                        } else {
                            result.output.clone()
                        })
                        .with_data(serde_json::json!({"is_error": result.is_error})),
                );

                let content = if result.is_error {
                    result.error.clone().unwrap_or_else(|| "tool failed".into())
                } else {
                    result.output.clone()
                };
                // One oversized tool output can blow the window on its own;
                // compact the older history first so the result still fits.
                if !self.context.can_fit(&content) {
                    let dropped = self.compact(&mut messages);
                    if dropped > 0 {
                        self.emit_event(
                            &mut log,
                            AgentEvent::new(EventKind::ContextWarning, iteration).with_message(
                                format!("dropped {dropped} oldest turns to fit tool output"),
                            ),
                        );
                    }
                }
                result_parts.push(MessagePart::ToolResult {
                    tool_use_id: result.tool_call_id.clone(),
                    content,
                    is_error: result.is_error,
                });
                all_calls.push(call);
                all_results.push(result);
            }

            let results_msg = Message::tool_results(result_parts);
            self.context.add_turn(&results_msg);
            messages.push(results_msg);

            self.emit_event(&mut log, AgentEvent::new(EventKind::IterationEnd, iteration));
        }

        let error = format!(
            "no final answer after {} iterations",
            self.config.max_iterations
        );
        let iterations = self.config.max_iterations;
        self.finish(
            StopReason::MaxIterations,
            iterations,
            last_text,
            all_calls,
            all_results,
            Some(error),
            log,
        )
    }

    /// Drop the oldest exchanges, keeping the system prompt, the opening
    /// turn, and the most recent turns. A note appended to the opening turn
    /// marks the gap so the model knows history is missing; a separate user
    /// turn would break role alternation. The cut never lands between an
    /// assistant tool-use turn and its results, which would break the wire
    /// format.
    fn compact(&mut self, messages: &mut Vec<Message>) -> usize {
        const NOTE: &str = "[older turns dropped to stay within the context window]";
        const KEEP_RECENT: usize = 4;
        let head = usize::from(self.system_prompt.is_some()) + 1;
        if messages.len() <= head + KEEP_RECENT {
            return 0;
        }
        let mut cut = messages.len() - KEEP_RECENT;
        while cut < messages.len() && starts_with_tool_result(&messages[cut]) {
            cut += 1;
        }
        if cut >= messages.len() {
            return 0;
        }
        let removed: Vec<Message> = messages.drain(head..cut).collect();
        for turn in &removed {
            self.context.remove_turn(turn);
        }
        let query_turn = &mut messages[head - 1];
        let already_marked = query_turn
            .parts
            .iter()
            .any(|p| matches!(p, MessagePart::Text { text } if text == NOTE));
        if !already_marked {
            query_turn.parts.push(MessagePart::Text { text: NOTE.into() });
            self.context.add_tokens(NOTE.len() / 4);
        }
        removed.len()
    }

    /// Gate and execute a single tool call. Failures become error results so
    /// the model can react; they never abort the loop.
    async fn run_tool(
        &self,
        call: &ToolCall,
        iteration: usize,
        log: &mut Vec<AgentEvent>,
    ) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResult::error(call.id.clone(), format!("unknown tool: {}", call.name));
        };

        match self.config.is_tool_allowed(&call.name, tool.is_dangerous()) {
            ToolDecision::Allow => {}
            ToolDecision::Deny { reason } => {
                self.emit_event(
                    log,
                    AgentEvent::new(EventKind::ToolDenied, iteration)
                        .with_tool(call.name.clone(), call.id.clone())
                        .with_message(reason.clone()),
                );
                return ToolResult::error(call.id.clone(), reason);
            }
            ToolDecision::RequireApproval => {
                self.emit_event(
                    log,
                    AgentEvent::new(EventKind::ApprovalRequired, iteration)
                        .with_tool(call.name.clone(), call.id.clone()),
                );
                let approved = self.approval.as_ref().is_some_and(|f| f(call));
                if approved {
                    self.emit_event(
                        log,
                        AgentEvent::new(EventKind::ToolApproved, iteration)
                            .with_tool(call.name.clone(), call.id.clone()),
                    );
                } else {
                    let reason = format!("tool '{}' requires manual approval", call.name);
                    self.emit_event(
                        log,
                        AgentEvent::new(EventKind::ToolDenied, iteration)
                            .with_tool(call.name.clone(), call.id.clone())
                            .with_message(reason.clone()),
                    );
                    return ToolResult::error(call.id.clone(), reason);
                }
            }
        }

        let timeout = Duration::from_secs(self.config.tool_timeout_secs);
        match tokio::time::timeout(timeout, tool.execute(call)).await {
            Ok(result) => result,
            Err(_) => ToolResult::error(
                call.id.clone(),
                format!(
                    "tool '{}' timed out after {}s",
                    call.name, self.config.tool_timeout_secs
                ),
            ),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        stop_reason: StopReason,
        iterations: usize,
        final_response: Option<String>,
        tool_calls: Vec<ToolCall>,
        tool_results: Vec<ToolResult>,
        error: Option<String>,
        mut log: Vec<AgentEvent>,
    ) -> AgentOutcome {
        self.emit_event(
            &mut log,
            AgentEvent::new(EventKind::Complete, iterations)
                .with_message(error.clone().unwrap_or_default()),
        );
        AgentOutcome {
            success: false,
            final_response,
            iterations,
            tool_calls,
            tool_results,
            stop_reason,
            error,
            events: log,
        }
    }
}

fn starts_with_tool_result(message: &Message) -> bool {
    matches!(message.parts.first(), Some(MessagePart::ToolResult { .. }))
}

/// Rebuild the assistant turn from the model's response so the wire history
/// matches what the provider actually said.
fn assistant_turn(response: &ChatResponse) -> Message {
    match response {
        ChatResponse::Text(text) => Message::assistant(text.clone()),
        ChatResponse::ToolUse { text, tool_calls } => {
            Message::assistant_tool_use(text.clone(), tool_calls)
        }
    }
}

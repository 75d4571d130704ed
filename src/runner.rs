//! # Runner (orientation)
//!
//! The `Runner` drives one run from user input to final answer. It screens
//! the input through the entry agent's guardrails, then loops agent turns:
//! each turn submits the history and the active agent's instructions, tools,
//! handoffs and output schema to the model service, then either dispatches
//! tool calls through the agent's [`ToolRouter`], hands off to another agent,
//! or validates the terminal output and stops.
//!
//! ```text
//! Init → GuardrailCheck → AgentTurn → ToolDispatch    → AgentTurn
//!                                   → HandoffDispatch → AgentTurn
//!                                   → Final           → Done
//! any fatal error                                     → Aborted
//! ```
//!
//! Handoff turns and tool turns draw from the same `max_turns` budget, so two
//! agents handing off to each other end in `TurnLimitExceeded`.
//!
//! Outgoing history is logged at debug level under the `runner::messages`
//! target.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneService;
use tower::{BoxError, Service, ServiceExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::AgentDefinition;
use crate::config::RuntimeConfig;
use crate::context::{RunContext, Turn, TurnOutcome};
use crate::error::{GenerationError, RunError};
use crate::guardrail::{GuardrailContext, GuardrailEngine, GuardrailOptions};
use crate::handoff::{
    advertised_handoffs, instructions_with_handoffs, transfer_tool_name, HandoffRequest,
    HandoffResolver,
};
use crate::items::{Message, Role, ToolCall};
use crate::provider::{
    classify_error, Generation, GenerationRequest, GenerationResponse, ModelService,
    OpenAIProvider, ToolSchema,
};
use crate::registry::AgentRegistry;
use crate::result::{FinalOutput, RunFailure, RunResult};
use crate::retry::{retry_async, RetryPolicy};
use crate::tool::hosted::HostedProviders;
use crate::tool::{dispatch, DispatchOptions, ToolInvocation, ToolRouter};
use crate::trace::{gen_trace_id, SpanId, SpanKind, TraceExporter};
use crate::usage::UsageStats;

fn truncate_for_log(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let mut out: String = s.chars().take(max).collect();
        out.push('…');
        out
    } else {
        s.to_string()
    }
}

fn format_messages_for_log(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for (idx, m) in messages.iter().enumerate() {
        match m.role {
            Role::User => {
                lines.push(format!("{:02} USER     | {}", idx, truncate_for_log(&m.content, 160)));
            }
            Role::System => {
                lines.push(format!("{:02} SYSTEM   | {}", idx, truncate_for_log(&m.content, 160)));
            }
            Role::Assistant => {
                let who = m.name.as_deref().unwrap_or("-");
                if let Some(tool_calls) = &m.tool_calls {
                    let calls: Vec<String> = tool_calls
                        .iter()
                        .map(|tc| format!("id={}, name={}", tc.id, tc.name))
                        .collect();
                    lines.push(format!(
                        "{:02} ASSIST   | [{}] tool_calls=[{}]",
                        idx,
                        who,
                        calls.join(", ")
                    ));
                } else {
                    lines.push(format!(
                        "{:02} ASSIST   | [{}] {}",
                        idx,
                        who,
                        truncate_for_log(&m.content, 160)
                    ));
                }
            }
            Role::Tool => {
                let tcid = m.tool_call_id.as_deref().unwrap_or("<missing tool_call_id>");
                lines.push(format!(
                    "{:02} TOOL     | tool_call_id={} payload={}",
                    idx,
                    tcid,
                    truncate_for_log(&m.content, 120)
                ));
            }
        }
    }
    lines.join("\n")
}

/// Everything a run needs besides the registry and the model.
///
/// Built explicitly by the caller and shared read-only by every run of a
/// [`Runner`].
#[derive(Clone, Default)]
pub struct RunEnv {
    pub config: RuntimeConfig,
    pub providers: HostedProviders,
    /// Receives the spans of every finished run
    pub exporter: Option<Arc<dyn TraceExporter>>,
}

impl RunEnv {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_providers(mut self, providers: HostedProviders) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn TraceExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }
}

impl std::fmt::Debug for RunEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunEnv")
            .field("config", &self.config)
            .field("providers", &self.providers)
            .field("exporter", &self.exporter.is_some())
            .finish()
    }
}

/// Output of a single restricted turn.
#[derive(Debug, Clone)]
pub struct RestrictedOutput {
    pub agent: String,
    pub output: FinalOutput,
    pub usage: UsageStats,
}

enum RunState {
    GuardrailCheck,
    AgentTurn,
    ToolDispatch {
        turn: TurnStart,
        calls: Vec<ToolCall>,
    },
    HandoffDispatch {
        turn: TurnStart,
        request: HandoffRequest,
    },
    Final {
        turn: TurnStart,
        generation: Generation,
    },
    Done(FinalOutput),
}

struct TurnStart {
    index: usize,
    agent: Arc<AgentDefinition>,
    history_len: usize,
    span: SpanId,
}

/// Executes runs against a registry of agents.
///
/// Cheap to clone; clones share the registry, the model service and the
/// environment.
#[derive(Clone)]
pub struct Runner {
    registry: Arc<AgentRegistry>,
    // BoxCloneService is not Sync; the lock is held only to clone it
    model: Arc<Mutex<ModelService>>,
    env: Arc<RunEnv>,
}

impl Runner {
    pub fn new<S>(registry: Arc<AgentRegistry>, model: S, env: RunEnv) -> Self
    where
        S: Service<GenerationRequest, Response = GenerationResponse, Error = BoxError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            registry,
            model: Arc::new(Mutex::new(BoxCloneService::new(model))),
            env: Arc::new(env),
        }
    }

    /// Runner backed by [`OpenAIProvider`] configured from `env.config`.
    pub fn with_openai(registry: Arc<AgentRegistry>, env: RunEnv) -> Self {
        let provider = OpenAIProvider::from_config(&env.config);
        Self::new(registry, provider, env)
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.env.config
    }

    fn model_service(&self) -> ModelService {
        self.model
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run `input` starting at the agent named `entry`.
    pub async fn run(&self, entry: &str, input: &str) -> Result<RunResult, RunFailure> {
        self.run_with_cancel(entry, input, &CancellationToken::new())
            .await
    }

    /// Like [`Runner::run`], aborting with `Cancelled` once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        entry: &str,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<RunResult, RunFailure> {
        let Some(agent) = self.registry.get(entry) else {
            warn!(agent = %entry, "unknown entry agent");
            return Err(RunFailure {
                error: RunError::UnknownAgent(entry.to_string()),
                last_agent: entry.to_string(),
                turns: Vec::new(),
                guardrails: Vec::new(),
                trace_id: gen_trace_id(),
                spans: Vec::new(),
                usage: UsageStats::new(),
            });
        };

        let mut ctx = RunContext::new(agent, input, self.env.config.max_turns);
        info!(
            agent = %entry,
            trace_id = %ctx.trace().trace_id(),
            max_turns = self.env.config.max_turns,
            "run started"
        );

        match self.drive(&mut ctx, input, cancel).await {
            Ok(output) => {
                let result = ctx.finish(output);
                info!(
                    agent = %result.last_agent,
                    turns = result.turns.len(),
                    tokens = result.usage.total.total_tokens,
                    "run finished"
                );
                self.export(&result.trace_id, &result.spans);
                Ok(result)
            }
            Err(error) => {
                let failure = ctx.abort(error);
                info!(
                    agent = %failure.last_agent,
                    turns = failure.turns.len(),
                    kind = failure.kind(),
                    error = %failure.error,
                    "run aborted"
                );
                self.export(&failure.trace_id, &failure.spans);
                Err(failure)
            }
        }
    }

    /// One turn of `agent` with no tools and no handoffs.
    ///
    /// Used for guardrail agents. The output is validated against the agent's
    /// schema like any terminal output; a tool call or handoff is an
    /// `OutputValidationFailed`.
    pub async fn run_restricted(
        &self,
        agent: &str,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<RestrictedOutput, RunError> {
        let agent = self
            .registry
            .get(agent)
            .ok_or_else(|| RunError::UnknownAgent(agent.to_string()))?;
        let history = vec![Message::user(input)];
        let request = self.build_request(&agent, &history, true);
        let model = request.model.clone();
        debug!(agent = %agent.name, "restricted turn");

        let response = self.generate(request, cancel).await?;
        let mut usage = UsageStats::new();
        usage.record(&model, &agent.name, response.usage);

        let output = match response.generation {
            Generation::ToolCalls(_) | Generation::Handoff(_) => {
                return Err(RunError::OutputValidationFailed {
                    agent: agent.name.clone(),
                    message: "restricted turn must end with a final output".to_string(),
                })
            }
            generation => finalize(&agent, generation)?,
        };
        Ok(RestrictedOutput {
            agent: agent.name.clone(),
            output,
            usage,
        })
    }

    async fn drive(
        &self,
        ctx: &mut RunContext,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<FinalOutput, RunError> {
        let mut state = RunState::GuardrailCheck;
        loop {
            state = match state {
                RunState::GuardrailCheck => {
                    self.check_guardrails(ctx, input, cancel).await?;
                    RunState::AgentTurn
                }
                RunState::AgentTurn => self.agent_turn(ctx, cancel).await?,
                RunState::ToolDispatch { turn, calls } => {
                    self.dispatch_tools(ctx, turn, calls, cancel).await?;
                    RunState::AgentTurn
                }
                RunState::HandoffDispatch { turn, request } => {
                    self.hand_off(ctx, turn, request)?;
                    RunState::AgentTurn
                }
                RunState::Final { turn, generation } => {
                    let output = match finalize(&turn.agent, generation.clone()) {
                        Ok(output) => output,
                        Err(error) => return Err(reject(ctx, &turn, generation, error)),
                    };
                    let content = match &output {
                        FinalOutput::Text(s) => s.clone(),
                        FinalOutput::Structured(v) => v.to_string(),
                    };
                    ctx.push_message(Message::assistant(content).with_name(&turn.agent.name));
                    ctx.trace().end_span(&turn.span);
                    ctx.record_turn(Turn {
                        index: turn.index,
                        agent: turn.agent.name.clone(),
                        history_len: turn.history_len,
                        outcome: TurnOutcome::Final(output.clone()),
                    });
                    RunState::Done(output)
                }
                RunState::Done(output) => return Ok(output),
            };
        }
    }

    async fn check_guardrails(
        &self,
        ctx: &mut RunContext,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let agent = ctx.active().clone();
        if agent.input_guardrails.is_empty() {
            return Ok(());
        }
        let gctx = GuardrailContext {
            runner: self,
            cancel,
        };
        let report = GuardrailEngine::evaluate(
            &agent.input_guardrails,
            input,
            &gctx,
            GuardrailOptions::from(&self.env.config),
        )
        .await?;

        for record in &report.records {
            let error = record.annotation.as_ref().map(|a| format!("{:?}", a));
            ctx.trace().record_completed(
                SpanKind::Guardrail {
                    guardrail: record.name.clone(),
                    triggered: record.triggered,
                },
                record.started_at,
                error,
            );
        }
        let tripped = report.trip_error();
        ctx.record_guardrails(report.records);

        if let Some(error) = tripped {
            if let RunError::GuardrailTripped {
                guardrail,
                rationale,
            } = &error
            {
                info!(guardrail = %guardrail, rationale = %rationale, "input guardrail tripped");
            }
            return Err(error);
        }
        Ok(())
    }

    async fn agent_turn(
        &self,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<RunState, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let index = ctx.next_turn()?;
        let agent = ctx.active().clone();
        let history_len = ctx.history().len();
        debug!(turn = index, agent = %agent.name, "starting turn");

        let span = ctx.trace().start_span(SpanKind::AgentTurn {
            agent: agent.name.clone(),
            turn: index,
        });
        let request = self.build_request(&agent, ctx.history(), false);
        let model = request.model.clone();
        debug!(
            target: "runner::messages",
            "\n=== Sending to model (agent: {}, model: {}) ===\n{}\n=== end ===",
            agent.name,
            model,
            format_messages_for_log(&request.history)
        );

        let generation_span = ctx.trace().start_span(SpanKind::Generation {
            model: model.clone(),
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        let response = self.generate(request, cancel).await?;
        ctx.trace().end_generation(&generation_span, &response.usage);
        ctx.record_usage(&model, &agent.name, response.usage);

        let turn = TurnStart {
            index,
            agent,
            history_len,
            span,
        };
        Ok(match response.generation {
            Generation::ToolCalls(calls) if calls.is_empty() => {
                let error = GenerationError::Malformed("empty tool call set".to_string()).into();
                return Err(reject(ctx, &turn, Generation::ToolCalls(calls), error));
            }
            Generation::ToolCalls(calls) => RunState::ToolDispatch { turn, calls },
            Generation::Handoff(request) => RunState::HandoffDispatch { turn, request },
            generation => RunState::Final { turn, generation },
        })
    }

    async fn dispatch_tools(
        &self,
        ctx: &mut RunContext,
        turn: TurnStart,
        calls: Vec<ToolCall>,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let agent = &turn.agent;
        ctx.push_message(
            Message::assistant_with_tool_calls("", calls.clone()).with_name(&agent.name),
        );

        let router = ToolRouter::new(&agent.tools, &self.env.providers);
        let invocations: Vec<ToolInvocation> = calls.iter().map(ToolInvocation::from).collect();
        let options = DispatchOptions {
            parallel: self.env.config.parallel_tools,
            max_concurrency: self.env.config.max_concurrency,
            timeout: self.env.config.tool_timeout,
        };
        let started = Utc::now();
        let outputs = match dispatch(router, invocations, options, cancel).await {
            Ok(outputs) => outputs,
            Err(error) => return Err(reject(ctx, &turn, Generation::ToolCalls(calls), error)),
        };

        // Results are fed back in issue order
        for output in &outputs {
            ctx.trace().record_completed(
                SpanKind::Tool {
                    tool_name: output.name.clone(),
                    call_id: output.id.clone(),
                },
                started,
                output.result.as_ref().err().map(|e| e.to_string()),
            );
            ctx.push_message(Message::tool(output.render(), &output.id).with_name(&output.name));
        }
        debug!(
            target: "runner::messages",
            "\n↳ Appended {} tool result(s)\n{}\n---",
            outputs.len(),
            format_messages_for_log(ctx.history())
        );

        ctx.trace().end_span(&turn.span);
        ctx.record_turn(Turn {
            index: turn.index,
            agent: agent.name.clone(),
            history_len: turn.history_len,
            outcome: TurnOutcome::ToolCalls { calls, outputs },
        });
        Ok(())
    }

    fn hand_off(
        &self,
        ctx: &mut RunContext,
        turn: TurnStart,
        request: HandoffRequest,
    ) -> Result<(), RunError> {
        let decision = match HandoffResolver::new(&self.registry).resolve(&turn.agent, &request) {
            Ok(decision) => decision,
            Err(error) => return Err(reject(ctx, &turn, Generation::Handoff(request), error)),
        };
        info!(
            from = %decision.data.from_agent,
            to = %decision.data.to_agent,
            reason = request.reason.as_deref().unwrap_or("-"),
            "handoff"
        );

        let call_id = request
            .call_id
            .clone()
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
        let arguments = match &request.reason {
            Some(reason) => json!({ "reason": reason }),
            None => json!({}),
        };
        let tool_name = transfer_tool_name(&decision.data.to_agent);
        ctx.push_message(
            Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new(call_id.clone(), tool_name.clone(), arguments)],
            )
            .with_name(&turn.agent.name),
        );
        let ack = json!({ "handoff": decision.data.to_agent, "ack": true });
        ctx.push_message(Message::tool(ack.to_string(), call_id).with_name(tool_name));

        let handoff_span = ctx.trace().start_span(SpanKind::Handoff {
            from_agent: decision.data.from_agent.clone(),
            to_agent: decision.data.to_agent.clone(),
            reason: decision.data.reason.clone(),
        });
        ctx.trace().end_span(&handoff_span);
        ctx.trace().end_span(&turn.span);

        ctx.switch_to(decision.agent);
        ctx.record_turn(Turn {
            index: turn.index,
            agent: turn.agent.name.clone(),
            history_len: turn.history_len,
            outcome: TurnOutcome::Handoff(decision.data),
        });
        Ok(())
    }

    fn build_request(
        &self,
        agent: &AgentDefinition,
        history: &[Message],
        restricted: bool,
    ) -> GenerationRequest {
        let (tools, handoffs) = if restricted {
            (Vec::new(), Vec::new())
        } else {
            (
                agent.tools.iter().map(ToolSchema::from).collect(),
                advertised_handoffs(agent, &self.registry),
            )
        };
        GenerationRequest {
            agent: agent.name.clone(),
            model: agent
                .settings
                .model
                .clone()
                .unwrap_or_else(|| self.env.config.model.clone()),
            instructions: instructions_with_handoffs(agent, &handoffs),
            history: history.to_vec(),
            tools,
            handoffs,
            output_schema: agent.output_schema.clone(),
            settings: agent.settings.clone(),
        }
    }

    /// One generation with timeout, retry and cancellation applied.
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse, RunError> {
        let timeout = self.env.config.model_timeout;
        let mut policy = RetryPolicy::new(self.env.config.retry.clone());
        let attempt = || {
            let svc = self.model_service();
            let request = request.clone();
            async move {
                match tokio::time::timeout(timeout, svc.oneshot(request)).await {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(e)) => Err(classify_error(e)),
                    Err(_) => Err(GenerationError::Unavailable(format!(
                        "generation timed out after {:?}",
                        timeout
                    ))),
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(RunError::Cancelled),
            result = retry_async(attempt, &mut policy) => result.map_err(|e| {
                warn!(agent = %request.agent, error = %e, "generation failed");
                RunError::from(e)
            }),
        }
    }

    fn export(&self, trace_id: &str, spans: &[crate::trace::Span]) {
        if let Some(exporter) = &self.env.exporter {
            if let Err(e) = exporter.export(trace_id, spans) {
                warn!(trace_id = %trace_id, error = %e, "trace export failed");
            }
        }
    }
}

/// Record the turn whose generation was refused, then hand back `error`.
fn reject(
    ctx: &mut RunContext,
    turn: &TurnStart,
    generation: Generation,
    error: RunError,
) -> RunError {
    ctx.trace().fail_span(&turn.span, error.to_string());
    ctx.record_turn(Turn {
        index: turn.index,
        agent: turn.agent.name.clone(),
        history_len: turn.history_len,
        outcome: TurnOutcome::Rejected {
            generation,
            error: error.to_string(),
        },
    });
    error
}

/// Terminal output of `agent`, validated against its schema when it has one.
fn finalize(agent: &AgentDefinition, generation: Generation) -> Result<FinalOutput, RunError> {
    let invalid = |message: String| RunError::OutputValidationFailed {
        agent: agent.name.clone(),
        message,
    };
    match (&agent.output_schema, generation) {
        (Some(schema), Generation::Structured(value)) => {
            schema.validate(&value).map_err(invalid)?;
            Ok(FinalOutput::Structured(value))
        }
        (Some(schema), Generation::Text(text)) => {
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| invalid(format!("output is not JSON: {}", e)))?;
            schema.validate(&value).map_err(invalid)?;
            Ok(FinalOutput::Structured(value))
        }
        (None, Generation::Structured(value)) => Ok(FinalOutput::Structured(value)),
        (None, Generation::Text(text)) => Ok(FinalOutput::Text(text)),
        (_, other) => Err(invalid(format!("not a terminal output: {:?}", other))),
    }
}

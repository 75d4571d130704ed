//! Run-scoped state
//!
//! A [`RunContext`] belongs to exactly one run. It holds the conversation
//! history, the active agent, the turn trace and the turn counter, and is
//! mutated only by the run loop, so nothing in it is locked.

use std::sync::Arc;

use crate::agent::AgentDefinition;
use crate::error::RunError;
use crate::guardrail::GuardrailRecord;
use crate::handoff::HandoffData;
use crate::items::{Message, ToolCall};
use crate::provider::Generation;
use crate::result::{FinalOutput, RunFailure, RunResult};
use crate::tool::ToolOutput;
use crate::trace::TraceRecorder;
use crate::usage::{Usage, UsageStats};

/// What a turn ended with. Exactly one outcome per turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Calls in issue order, outputs in the same order
    ToolCalls {
        calls: Vec<ToolCall>,
        outputs: Vec<ToolOutput>,
    },
    Handoff(HandoffData),
    Final(FinalOutput),
    /// The generation was refused and the run aborted with `error`
    Rejected {
        generation: Generation,
        error: String,
    },
}

/// One agent turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// 1-based, strictly increasing across the run
    pub index: usize,
    pub agent: String,
    /// Length of the history submitted to the model
    pub history_len: usize,
    pub outcome: TurnOutcome,
}

pub struct RunContext {
    history: Vec<Message>,
    active: Arc<AgentDefinition>,
    turns: Vec<Turn>,
    counter: usize,
    max_turns: usize,
    guardrails: Vec<GuardrailRecord>,
    usage: UsageStats,
    trace: TraceRecorder,
}

impl RunContext {
    pub fn new(entry: Arc<AgentDefinition>, input: impl Into<String>, max_turns: usize) -> Self {
        Self {
            history: vec![Message::user(input)],
            active: entry,
            turns: Vec::new(),
            counter: 0,
            max_turns,
            guardrails: Vec::new(),
            usage: UsageStats::new(),
            trace: TraceRecorder::new(),
        }
    }

    /// Claim the next turn index, or fail once `max_turns` is used up.
    pub fn next_turn(&mut self) -> Result<usize, RunError> {
        if self.counter >= self.max_turns {
            return Err(RunError::TurnLimitExceeded {
                max_turns: self.max_turns,
            });
        }
        self.counter += 1;
        Ok(self.counter)
    }

    pub fn turn_counter(&self) -> usize {
        self.counter
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn push_message(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn active(&self) -> &Arc<AgentDefinition> {
        &self.active
    }

    /// Switch the active agent; the history is carried over untouched.
    pub fn switch_to(&mut self, agent: Arc<AgentDefinition>) {
        self.active = agent;
    }

    pub fn record_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn record_guardrails(&mut self, records: Vec<GuardrailRecord>) {
        for record in &records {
            self.usage.merge(&record.usage);
        }
        self.guardrails.extend(records);
    }

    pub fn record_usage(&mut self, model: &str, agent: &str, usage: Usage) {
        self.usage.record(model, agent, usage);
    }

    pub fn usage(&self) -> &UsageStats {
        &self.usage
    }

    pub fn trace(&mut self) -> &mut TraceRecorder {
        &mut self.trace
    }

    pub fn finish(self, final_output: FinalOutput) -> RunResult {
        let trace_id = self.trace.trace_id().to_string();
        RunResult {
            final_output,
            last_agent: self.active.name.clone(),
            turns: self.turns,
            guardrails: self.guardrails,
            trace_id,
            spans: self.trace.into_spans(),
            usage: self.usage,
        }
    }

    pub fn abort(mut self, error: RunError) -> RunFailure {
        self.trace.abort_open(&error.to_string());
        let trace_id = self.trace.trace_id().to_string();
        RunFailure {
            error,
            last_agent: self.active.name.clone(),
            turns: self.turns,
            guardrails: self.guardrails,
            trace_id,
            spans: self.trace.into_spans(),
            usage: self.usage,
        }
    }
}

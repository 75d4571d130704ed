//! Outcome of a run
//!
//! A finished run yields a [`RunResult`]; an aborted one yields a
//! [`RunFailure`] carrying the fatal error. Both carry the full turn trace,
//! the guardrail records and the trace id, so a caller can always see what
//! happened.

use std::fmt;

use serde_json::Value;

use crate::context::Turn;
use crate::error::RunError;
use crate::guardrail::GuardrailRecord;
use crate::trace::Span;
use crate::usage::UsageStats;

/// Terminal output of the producing agent.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalOutput {
    Text(String),
    /// Validated against the producing agent's output schema
    Structured(Value),
}

impl FinalOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FinalOutput::Text(s) => Some(s),
            FinalOutput::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            FinalOutput::Structured(v) => Some(v),
            FinalOutput::Text(_) => None,
        }
    }
}

impl fmt::Display for FinalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalOutput::Text(s) => f.write_str(s),
            FinalOutput::Structured(v) => write!(f, "{}", v),
        }
    }
}

/// A run that reached `Done`.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub final_output: FinalOutput,
    /// Name of the agent that produced `final_output`
    pub last_agent: String,
    pub turns: Vec<Turn>,
    pub guardrails: Vec<GuardrailRecord>,
    pub trace_id: String,
    pub spans: Vec<Span>,
    pub usage: UsageStats,
}

impl RunResult {
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

/// A run that ended `Aborted`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("run aborted after {} turn(s): {error}", .turns.len())]
pub struct RunFailure {
    pub error: RunError,
    /// Active agent when the run aborted
    pub last_agent: String,
    pub turns: Vec<Turn>,
    pub guardrails: Vec<GuardrailRecord>,
    pub trace_id: String,
    pub spans: Vec<Span>,
    pub usage: UsageStats,
}

impl RunFailure {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

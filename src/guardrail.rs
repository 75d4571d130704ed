//! # Input guardrails
//!
//! Guardrails screen the user input before the entry agent runs. Every
//! guardrail of the entry agent is evaluated concurrently against the same
//! input; none depends on another or on ordering. A guardrail is either a
//! deterministic predicate ([`PatternBlockGuardrail`], [`MaxLengthGuardrail`])
//! or a sub-agent whose structured verdict decides ([`AgentGuardrail`]).
//!
//! [`GuardrailEngine::evaluate`] collects one [`GuardrailRecord`] per
//! guardrail, in declaration order. A triggered guardrail with
//! `abort_on_trigger` aborts the run; when several trip, the first declared
//! one is reported. Timeouts, malformed verdicts and failed sub-agent runs
//! are annotations on the record and never abort by themselves.
//!
//! ```rust
//! use agent_relay::guardrail::PatternBlockGuardrail;
//!
//! let guard = PatternBlockGuardrail::new(vec!["romulan ale".to_string()]);
//! assert!(guard.matches("Where can I buy Romulan Ale?").is_some());
//! assert!(guard.matches("What is a warp core?").is_none());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agent_relay_derive::structured_output;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{GuardrailTimeoutPolicy, RuntimeConfig};
use crate::error::RunError;
use crate::result::FinalOutput;
use crate::runner::Runner;
use crate::schema::OutputSchema;
use crate::usage::UsageStats;

/// Verdict of one guardrail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardrailVerdict {
    pub triggered: bool,
    pub rationale: Option<String>,
    /// Structured output of a sub-agent guardrail
    pub raw_output: Option<Value>,
    pub usage: UsageStats,
}

impl GuardrailVerdict {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn block(rationale: impl Into<String>) -> Self {
        Self {
            triggered: true,
            rationale: Some(rationale.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GuardrailError {
    /// The verdict could not be read or failed schema validation
    #[error("malformed guardrail output: {0}")]
    Malformed(String),

    #[error("guardrail failed: {0}")]
    Failed(String),

    #[error("guardrail cancelled")]
    Cancelled,
}

/// What a guardrail can reach while checking.
pub struct GuardrailContext<'a> {
    /// Runner used by sub-agent guardrails
    pub runner: &'a Runner,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait InputGuardrail: Send + Sync {
    async fn check(
        &self,
        input: &str,
        ctx: &GuardrailContext<'_>,
    ) -> Result<GuardrailVerdict, GuardrailError>;

    /// Registered agent this guardrail runs, if any
    fn sub_agent(&self) -> Option<&str> {
        None
    }
}

/// A named guardrail attached to an agent.
#[derive(Clone)]
pub struct GuardrailSpec {
    pub name: String,
    pub check: Arc<dyn InputGuardrail>,
    /// A triggered verdict aborts the run; otherwise it is only recorded
    pub abort_on_trigger: bool,
    /// Overrides the runtime's guardrail timeout
    pub timeout: Option<Duration>,
}

impl fmt::Debug for GuardrailSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardrailSpec")
            .field("name", &self.name)
            .field("sub_agent", &self.check.sub_agent())
            .field("abort_on_trigger", &self.abort_on_trigger)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GuardrailSpec {
    pub fn new(name: impl Into<String>, check: Arc<dyn InputGuardrail>) -> Self {
        Self {
            name: name.into(),
            check,
            abort_on_trigger: true,
            timeout: None,
        }
    }

    /// Record the verdict without ever aborting.
    pub fn non_blocking(mut self) -> Self {
        self.abort_on_trigger = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Why a record's verdict is not the guardrail's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "annotation", content = "detail", rename_all = "snake_case")]
pub enum GuardrailAnnotation {
    Timeout,
    Malformed(String),
    Failed(String),
}

/// One evaluated guardrail.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailRecord {
    pub name: String,
    pub triggered: bool,
    pub rationale: Option<String>,
    pub raw_output: Option<Value>,
    pub abort_on_trigger: bool,
    pub annotation: Option<GuardrailAnnotation>,
    pub usage: UsageStats,
    pub started_at: DateTime<Utc>,
}

impl GuardrailRecord {
    /// Whether this record aborts the run.
    pub fn trips(&self) -> bool {
        self.triggered && self.abort_on_trigger
    }
}

#[derive(Debug, Clone, Default)]
pub struct GuardrailReport {
    /// Declaration order
    pub records: Vec<GuardrailRecord>,
}

impl GuardrailReport {
    /// First aborting record in declaration order.
    pub fn tripped(&self) -> Option<&GuardrailRecord> {
        self.records.iter().find(|r| r.trips())
    }

    /// `GuardrailTripped` for the first aborting record, if any.
    pub fn trip_error(&self) -> Option<RunError> {
        self.tripped().map(|r| RunError::GuardrailTripped {
            guardrail: r.name.clone(),
            rationale: r
                .rationale
                .clone()
                .unwrap_or_else(|| "no rationale given".to_string()),
        })
    }
}

/// Timeout handling shared by every guardrail of a run.
#[derive(Debug, Clone, Copy)]
pub struct GuardrailOptions {
    pub timeout: Duration,
    pub timeout_policy: GuardrailTimeoutPolicy,
}

impl From<&RuntimeConfig> for GuardrailOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            timeout: config.guardrail_timeout,
            timeout_policy: config.guardrail_timeout_policy,
        }
    }
}

pub struct GuardrailEngine;

impl GuardrailEngine {
    /// Evaluate `guardrails` concurrently against `input`.
    ///
    /// Only cancellation fails; trips are reported through the returned
    /// [`GuardrailReport`].
    pub async fn evaluate(
        guardrails: &[GuardrailSpec],
        input: &str,
        ctx: &GuardrailContext<'_>,
        options: GuardrailOptions,
    ) -> Result<GuardrailReport, RunError> {
        if guardrails.is_empty() {
            return Ok(GuardrailReport::default());
        }
        let checks = guardrails
            .iter()
            .map(|spec| Self::evaluate_one(spec, input, ctx, options));

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(RunError::Cancelled),
            records = join_all(checks) => Ok(GuardrailReport { records }),
        }
    }

    async fn evaluate_one(
        spec: &GuardrailSpec,
        input: &str,
        ctx: &GuardrailContext<'_>,
        options: GuardrailOptions,
    ) -> GuardrailRecord {
        let started_at = Utc::now();
        let timeout = spec.timeout.unwrap_or(options.timeout);
        let mut record = GuardrailRecord {
            name: spec.name.clone(),
            triggered: false,
            rationale: None,
            raw_output: None,
            abort_on_trigger: spec.abort_on_trigger,
            annotation: None,
            usage: UsageStats::new(),
            started_at,
        };

        match tokio::time::timeout(timeout, spec.check.check(input, ctx)).await {
            Ok(Ok(verdict)) => {
                debug!(guardrail = %spec.name, triggered = verdict.triggered, "guardrail evaluated");
                record.triggered = verdict.triggered;
                record.rationale = verdict.rationale;
                record.raw_output = verdict.raw_output;
                record.usage = verdict.usage;
            }
            Ok(Err(GuardrailError::Malformed(message))) => {
                warn!(guardrail = %spec.name, error = %message, "malformed guardrail output, treating as not triggered");
                record.annotation = Some(GuardrailAnnotation::Malformed(message));
            }
            Ok(Err(e)) => {
                warn!(guardrail = %spec.name, error = %e, "guardrail failed, treating as not triggered");
                record.annotation = Some(GuardrailAnnotation::Failed(e.to_string()));
            }
            Err(_) => {
                warn!(guardrail = %spec.name, timeout = ?timeout, policy = ?options.timeout_policy, "guardrail timed out");
                record.annotation = Some(GuardrailAnnotation::Timeout);
                if options.timeout_policy == GuardrailTimeoutPolicy::FailClosed {
                    record.triggered = true;
                    record.rationale = Some(format!("guardrail timed out after {:?}", timeout));
                }
            }
        }
        record
    }
}

/// Blocks input containing any of a set of patterns, case-insensitively.
#[derive(Debug, Clone)]
pub struct PatternBlockGuardrail {
    patterns: Vec<String>,
}

impl PatternBlockGuardrail {
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// First pattern found in `input`.
    pub fn matches(&self, input: &str) -> Option<&str> {
        let input = input.to_lowercase();
        self.patterns
            .iter()
            .find(|p| input.contains(p.as_str()))
            .map(String::as_str)
    }
}

#[async_trait]
impl InputGuardrail for PatternBlockGuardrail {
    async fn check(
        &self,
        input: &str,
        _ctx: &GuardrailContext<'_>,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        Ok(match self.matches(input) {
            Some(pattern) => {
                GuardrailVerdict::block(format!("Input contains blocked pattern: {}", pattern))
            }
            None => GuardrailVerdict::pass(),
        })
    }
}

/// Blocks input longer than a number of characters.
#[derive(Debug, Clone)]
pub struct MaxLengthGuardrail {
    max_length: usize,
}

impl MaxLengthGuardrail {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

#[async_trait]
impl InputGuardrail for MaxLengthGuardrail {
    async fn check(
        &self,
        input: &str,
        _ctx: &GuardrailContext<'_>,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        if input.chars().count() > self.max_length {
            Ok(GuardrailVerdict::block(format!(
                "Input exceeds maximum length of {} characters",
                self.max_length
            )))
        } else {
            Ok(GuardrailVerdict::pass())
        }
    }
}

/// Default verdict shape of a guardrail agent.
#[structured_output]
#[derive(Debug, Clone, PartialEq)]
pub struct BlockVerdict {
    /// Whether the input must not be processed
    pub is_blocked: bool,
    pub reasoning: String,
}

/// Runs a registered agent on the input and reads its structured verdict.
///
/// The agent runs through [`Runner::run_restricted`]: one turn, no tools, no
/// handoffs. Its output is validated against its declared schema, then the
/// boolean `triggered_field` and the string `rationale_field` are read.
#[derive(Debug, Clone)]
pub struct AgentGuardrail {
    agent: String,
    triggered_field: String,
    rationale_field: String,
}

impl AgentGuardrail {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            triggered_field: "is_blocked".to_string(),
            rationale_field: "reasoning".to_string(),
        }
    }

    pub fn with_fields(
        mut self,
        triggered_field: impl Into<String>,
        rationale_field: impl Into<String>,
    ) -> Self {
        self.triggered_field = triggered_field.into();
        self.rationale_field = rationale_field.into();
        self
    }

    /// Schema for agents answering with a [`BlockVerdict`].
    pub fn output_schema() -> OutputSchema {
        OutputSchema::of::<BlockVerdict>()
    }

    fn read_verdict(&self, value: Value) -> Result<GuardrailVerdict, GuardrailError> {
        let triggered = value
            .get(&self.triggered_field)
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                GuardrailError::Malformed(format!(
                    "missing boolean field '{}'",
                    self.triggered_field
                ))
            })?;
        let rationale = value
            .get(&self.rationale_field)
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(GuardrailVerdict {
            triggered,
            rationale,
            raw_output: Some(value),
            usage: UsageStats::new(),
        })
    }
}

#[async_trait]
impl InputGuardrail for AgentGuardrail {
    async fn check(
        &self,
        input: &str,
        ctx: &GuardrailContext<'_>,
    ) -> Result<GuardrailVerdict, GuardrailError> {
        let out = ctx
            .runner
            .run_restricted(&self.agent, input, ctx.cancel)
            .await
            .map_err(|e| match e {
                RunError::Cancelled => GuardrailError::Cancelled,
                RunError::OutputValidationFailed { message, .. } => {
                    GuardrailError::Malformed(message)
                }
                other => GuardrailError::Failed(other.to_string()),
            })?;

        let value = match out.output {
            FinalOutput::Structured(v) => v,
            FinalOutput::Text(text) => serde_json::from_str(&text)
                .map_err(|e| GuardrailError::Malformed(format!("verdict is not JSON: {}", e)))?,
        };
        let mut verdict = self.read_verdict(value)?;
        verdict.usage = out.usage;
        Ok(verdict)
    }

    fn sub_agent(&self) -> Option<&str> {
        Some(&self.agent)
    }
}

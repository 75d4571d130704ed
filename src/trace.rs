//! # Run traces
//!
//! Every run records a flat list of [`Span`]s under one trace id: one span
//! per agent turn with nested generation, tool and handoff spans, plus one
//! span per input guardrail. Spans nest through `parent_id`; the recorder
//! tracks the innermost open span so callers only start and end them.
//!
//! The recorder is owned by the run and never shared, so it needs no lock.
//! When the run ends the spans are handed to an optional [`TraceExporter`].
//!
//! ```rust
//! use agent_relay::trace::{SpanKind, TraceRecorder};
//!
//! let mut trace = TraceRecorder::new();
//! let turn = trace.start_span(SpanKind::AgentTurn { agent: "Data".into(), turn: 1 });
//! let tool = trace.start_span(SpanKind::Tool {
//!     tool_name: "eval_expression".into(),
//!     call_id: "call_1".into(),
//! });
//! trace.end_span(&tool);
//! trace.end_span(&turn);
//!
//! assert_eq!(trace.spans()[1].parent_id.as_deref(), Some(turn.as_str()));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::usage::Usage;

pub type TraceId = String;
pub type SpanId = String;

pub fn gen_trace_id() -> TraceId {
    Uuid::new_v4().to_string()
}

pub fn gen_span_id() -> SpanId {
    Uuid::new_v4().to_string()
}

/// The unit of work a span covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpanKind {
    AgentTurn {
        agent: String,
        turn: usize,
    },
    Generation {
        model: String,
        prompt_tokens: usize,
        completion_tokens: usize,
    },
    Tool {
        tool_name: String,
        call_id: String,
    },
    Guardrail {
        guardrail: String,
        triggered: bool,
    },
    Handoff {
        from_agent: String,
        to_agent: String,
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub trace_id: TraceId,
    pub parent_id: Option<SpanId>,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    /// `None` while the span is open
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Span {
    pub fn new(trace_id: TraceId, parent_id: Option<SpanId>, kind: SpanKind) -> Self {
        Self {
            id: gen_span_id(),
            trace_id,
            parent_id,
            kind,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.complete();
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// Collects the spans of one run.
#[derive(Debug)]
pub struct TraceRecorder {
    trace_id: TraceId,
    /// Open spans, innermost last
    open: Vec<SpanId>,
    spans: Vec<Span>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        let trace_id = gen_trace_id();
        debug!(trace_id = %trace_id, "starting trace");
        Self {
            trace_id,
            open: Vec::new(),
            spans: Vec::new(),
        }
    }

    /// Start a span as a child of the innermost open span.
    pub fn start_span(&mut self, kind: SpanKind) -> SpanId {
        let span = Span::new(self.trace_id.clone(), self.open.last().cloned(), kind);
        let id = span.id.clone();
        self.spans.push(span);
        self.open.push(id.clone());
        id
    }

    /// Record a span for work that already finished, e.g. one of several
    /// concurrent tool calls.
    pub fn record_completed(
        &mut self,
        kind: SpanKind,
        started: DateTime<Utc>,
        error: Option<String>,
    ) -> SpanId {
        let mut span = Span::new(self.trace_id.clone(), self.open.last().cloned(), kind);
        span.start_time = started;
        span.complete();
        span.error = error;
        let id = span.id.clone();
        self.spans.push(span);
        id
    }

    pub fn end_span(&mut self, span_id: &str) {
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            span.complete();
        }
        self.close(span_id);
    }

    pub fn fail_span(&mut self, span_id: &str, error: impl Into<String>) {
        let error = error.into();
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            span.fail(error);
        }
        self.close(span_id);
    }

    /// Fill in the token counts of a generation span and end it.
    pub fn end_generation(&mut self, span_id: &str, usage: &Usage) {
        if let Some(span) = self.spans.iter_mut().find(|s| s.id == span_id) {
            if let SpanKind::Generation {
                prompt_tokens,
                completion_tokens,
                ..
            } = &mut span.kind
            {
                *prompt_tokens = usage.prompt_tokens;
                *completion_tokens = usage.completion_tokens;
            }
        }
        self.end_span(span_id);
    }

    /// Fail every span that is still open, innermost first.
    pub fn abort_open(&mut self, error: &str) {
        while let Some(id) = self.open.last().cloned() {
            self.fail_span(&id, error);
        }
    }

    fn close(&mut self, span_id: &str) {
        if let Some(pos) = self.open.iter().rposition(|id| id == span_id) {
            // Children left open are closed with their parent
            self.open.truncate(pos);
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn into_spans(self) -> Vec<Span> {
        self.spans
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the spans of finished runs.
pub trait TraceExporter: Send + Sync {
    fn export(&self, trace_id: &str, spans: &[Span]) -> Result<()>;
}

/// Writes every span as a `tracing` event under the `agent_relay::trace` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExporter;

impl TraceExporter for LogExporter {
    fn export(&self, trace_id: &str, spans: &[Span]) -> Result<()> {
        info!(target: "agent_relay::trace", trace_id = %trace_id, spans = spans.len(), "trace finished");
        for span in spans {
            let kind = serde_json::to_string(&span.kind).unwrap_or_default();
            match &span.error {
                Some(error) => warn!(
                    target: "agent_relay::trace",
                    trace_id = %trace_id,
                    span_id = %span.id,
                    parent_id = span.parent_id.as_deref().unwrap_or("-"),
                    duration_ms = span.duration_ms().unwrap_or(0),
                    error = %error,
                    "{}", kind
                ),
                None => info!(
                    target: "agent_relay::trace",
                    trace_id = %trace_id,
                    span_id = %span.id,
                    parent_id = span.parent_id.as_deref().unwrap_or("-"),
                    duration_ms = span.duration_ms().unwrap_or(0),
                    "{}", kind
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn turn(agent: &str) -> SpanKind {
        SpanKind::AgentTurn {
            agent: agent.to_string(),
            turn: 1,
        }
    }

    #[test]
    fn test_trace_ids_unique() {
        assert_ne!(gen_trace_id(), gen_trace_id());
        assert_ne!(TraceRecorder::new().trace_id(), TraceRecorder::new().trace_id());
    }

    #[test]
    fn test_nested_spans() {
        let mut trace = TraceRecorder::new();
        let parent = trace.start_span(turn("Data"));
        let child = trace.start_span(SpanKind::Generation {
            model: "gpt-4o".into(),
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        trace.end_generation(&child, &Usage::new(100, 50));
        let sibling = trace.start_span(SpanKind::Handoff {
            from_agent: "Data".into(),
            to_agent: "Calculator".into(),
            reason: None,
        });
        trace.end_span(&sibling);
        trace.end_span(&parent);

        let spans = trace.spans();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].parent_id, None);
        assert_eq!(spans[1].parent_id.as_ref(), Some(&parent));
        assert_eq!(spans[2].parent_id.as_ref(), Some(&parent));
        assert_eq!(
            spans[1].kind,
            SpanKind::Generation {
                model: "gpt-4o".into(),
                prompt_tokens: 100,
                completion_tokens: 50
            }
        );
        assert!(spans.iter().all(|s| s.end_time.is_some()));
    }

    #[test]
    fn test_record_completed_under_open_span() {
        let mut trace = TraceRecorder::new();
        let parent = trace.start_span(turn("Calculator"));
        let started = Utc::now();
        trace.record_completed(
            SpanKind::Tool {
                tool_name: "eval_expression".into(),
                call_id: "a".into(),
            },
            started,
            Some("division by zero".into()),
        );
        trace.end_span(&parent);

        let tool = &trace.spans()[1];
        assert_eq!(tool.parent_id.as_ref(), Some(&parent));
        assert_eq!(tool.error.as_deref(), Some("division by zero"));
        assert!(tool.duration_ms().is_some());
    }

    #[test]
    fn test_abort_open_fails_remaining_spans() {
        let mut trace = TraceRecorder::new();
        let done = trace.start_span(turn("Data"));
        trace.end_span(&done);
        trace.start_span(turn("Calculator"));
        trace.start_span(SpanKind::Generation {
            model: "gpt-4o".into(),
            prompt_tokens: 0,
            completion_tokens: 0,
        });
        trace.abort_open("cancelled");

        let spans = trace.spans();
        assert!(spans[0].error.is_none());
        assert_eq!(spans[1].error.as_deref(), Some("cancelled"));
        assert_eq!(spans[2].error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn test_log_exporter() {
        let mut trace = TraceRecorder::new();
        let id = trace.start_span(turn("Data"));
        trace.fail_span(&id, "boom");
        assert!(LogExporter.export(trace.trace_id(), trace.spans()).is_ok());
    }

    #[test]
    fn test_span_serialization() {
        let span = Span::new(
            gen_trace_id(),
            None,
            SpanKind::Guardrail {
                guardrail: "Yar".into(),
                triggered: true,
            },
        );
        let v = serde_json::to_value(&span).unwrap();
        assert_eq!(v["kind"]["type"], "guardrail");
        let back: Span = serde_json::from_value(v).unwrap();
        assert_eq!(back.id, span.id);
    }
}

//! Token usage accounting
//!
//! Every generation reports a [`Usage`]; a run folds them into [`UsageStats`]
//! with a breakdown per agent and per model.
//!
//! ```rust
//! use agent_relay::usage::{Usage, UsageStats};
//!
//! let mut stats = UsageStats::new();
//! stats.record("gpt-4o", "Data", Usage::new(1200, 300));
//! stats.record("gpt-4o", "Calculator", Usage::new(500, 150));
//!
//! assert_eq!(stats.total.total_tokens, 2150);
//! assert_eq!(stats.by_agent["Calculator"].request_count, 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Add;

/// Token usage for a single generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    /// Number of generation requests folded into this value
    pub request_count: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            request_count: 1,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn add_usage(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.request_count += other.request_count;
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.add_usage(&other);
        self
    }
}

/// Usage aggregated over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total: Usage,
    pub by_model: BTreeMap<String, Usage>,
    pub by_agent: BTreeMap<String, Usage>,
}

impl UsageStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, model: &str, agent: &str, usage: Usage) {
        self.total.add_usage(&usage);
        self.by_model
            .entry(model.to_string())
            .or_default()
            .add_usage(&usage);
        self.by_agent
            .entry(agent.to_string())
            .or_default()
            .add_usage(&usage);
    }

    /// Fold another run's stats in, e.g. a guardrail sub-agent run.
    pub fn merge(&mut self, other: &UsageStats) {
        self.total.add_usage(&other.total);
        for (model, usage) in &other.by_model {
            self.by_model.entry(model.clone()).or_default().add_usage(usage);
        }
        for (agent, usage) in &other.by_agent {
            self.by_agent.entry(agent.clone()).or_default().add_usage(usage);
        }
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let mut report = format!(
            "Usage Summary:\nTotal Tokens: {}\nTotal Requests: {}\n",
            self.total.total_tokens, self.total.request_count
        );
        if !self.by_agent.is_empty() {
            report.push_str("\nBy Agent:\n");
            for (agent, usage) in &self.by_agent {
                report.push_str(&format!(
                    "  {}: {} tokens, {} requests\n",
                    agent, usage.total_tokens, usage.request_count
                ));
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.request_count, 1);
        assert_eq!(Usage::empty().request_count, 0);
    }

    #[test]
    fn test_usage_addition() {
        let sum = Usage::new(100, 50) + Usage::new(200, 75);
        assert_eq!(sum.prompt_tokens, 300);
        assert_eq!(sum.completion_tokens, 125);
        assert_eq!(sum.total_tokens, 425);
        assert_eq!(sum.request_count, 2);
    }

    #[test]
    fn test_usage_stats_breakdown() {
        let mut stats = UsageStats::new();
        stats.record("gpt-4o", "Data", Usage::new(100, 50));
        stats.record("gpt-4o", "Calculator", Usage::new(10, 5));
        stats.record("gpt-4o-mini", "Data", Usage::new(20, 10));

        assert_eq!(stats.total.total_tokens, 195);
        assert_eq!(stats.by_agent["Data"].request_count, 2);
        assert_eq!(stats.by_model["gpt-4o"].total_tokens, 165);

        let summary = stats.summary();
        assert!(summary.contains("Total Tokens: 195"));
        assert!(summary.contains("Calculator: 15 tokens"));
    }

    #[test]
    fn test_merge() {
        let mut a = UsageStats::new();
        a.record("m", "Data", Usage::new(1, 1));
        let mut b = UsageStats::new();
        b.record("m", "Guard", Usage::new(2, 2));
        a.merge(&b);
        assert_eq!(a.total.total_tokens, 6);
        assert_eq!(a.by_agent.len(), 2);
        assert_eq!(a.by_model["m"].request_count, 2);
    }
}

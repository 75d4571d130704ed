//! # Agent definitions
//!
//! An [`AgentDefinition`] is an immutable, named description of one
//! participant in a run: its instructions, sampling policy, tools, the agents
//! it may hand off to, an optional structured-output schema and the input
//! guardrails applied when it is the entry agent. Definitions are registered
//! in an [`crate::registry::AgentRegistry`] and shared read-only from there.
//!
//! ```rust
//! use agent_relay::agent::AgentDefinition;
//! use agent_relay::tool::calculator::eval_expression_tool;
//!
//! let calculator = AgentDefinition::simple(
//!     "Calculator",
//!     "Evaluate arithmetic with the eval_expression tool.",
//! )
//! .with_tool(eval_expression_tool())
//! .with_temperature(0.0)
//! .with_handoff_description("Performs arithmetic.");
//!
//! let data = AgentDefinition::simple("Data", "Answer questions.")
//!     .with_handoff("Calculator");
//!
//! assert_eq!(calculator.tools.len(), 1);
//! assert_eq!(data.handoffs[0].agent, "Calculator");
//! ```

use serde::{Deserialize, Serialize};

use crate::guardrail::GuardrailSpec;
use crate::handoff::HandoffTarget;
use crate::schema::OutputSchema;
use crate::tool::ToolSpec;

/// Sampling policy for an agent's generations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Overrides the runtime's default model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Immutable specification of an agent.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    /// Unique within a registry.
    pub name: String,

    /// System instructions for the agent's generations.
    pub instructions: String,

    /// Advertised to agents that can hand off to this one.
    pub handoff_description: Option<String>,

    pub settings: ModelSettings,

    /// Ordered tool set; names are unique within the agent.
    pub tools: Vec<ToolSpec>,

    /// Agents this one may delegate to.
    pub handoffs: Vec<HandoffTarget>,

    /// Structured output; free text when absent.
    pub output_schema: Option<OutputSchema>,

    /// Evaluated when this agent is the entry agent of a run.
    pub input_guardrails: Vec<GuardrailSpec>,
}

impl AgentDefinition {
    pub fn simple(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            handoff_description: None,
            settings: ModelSettings::default(),
            tools: Vec::new(),
            handoffs: Vec::new(),
            output_schema: None,
            input_guardrails: Vec::new(),
        }
    }

    pub fn with_tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = ToolSpec>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Allow handoff to the named agent.
    pub fn with_handoff(self, agent: impl Into<String>) -> Self {
        self.with_handoff_target(HandoffTarget::new(agent))
    }

    pub fn with_handoff_target(mut self, target: HandoffTarget) -> Self {
        self.handoffs.push(target);
        self
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.settings.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.settings.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_input_guardrail(mut self, guardrail: GuardrailSpec) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn can_hand_off_to(&self, agent: &str) -> bool {
        self.handoffs.iter().any(|h| h.agent == agent)
    }
}

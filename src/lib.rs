//! # agent-relay
//!
//! A Tower-based orchestration runtime for multi-agent workflows. A run takes
//! one user utterance, screens it through the entry agent's input guardrails,
//! then lets agents call tools or hand the conversation to each other until
//! one of them produces the final answer.
//!
//! ## Core Concepts
//!
//! - **Agents** ([`AgentDefinition`]): immutable, named specifications held in
//!   an [`AgentRegistry`] that validates the topology once, up front
//! - **Tools** ([`ToolSpec`]): local function tools, including the sandboxed
//!   `eval_expression` calculator, and hosted retrieval and web search tools
//!   reached through provider traits
//! - **Handoffs**: an agent delegates the rest of the run to another agent it
//!   declares; the history carries over unchanged
//! - **Guardrails**: concurrent input checks, deterministic or sub-agent
//!   based, that can veto a run before any agent turn
//! - **Model**: any `tower::Service<GenerationRequest>`; [`OpenAIProvider`]
//!   talks to chat completions and [`ScriptedProvider`] replays a script
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use agent_relay::{
//!     AgentDefinition, AgentRegistry, FinalOutput, Generation, HandoffRequest, RunEnv, Runner,
//!     ScriptedProvider, ToolCall,
//! };
//! use agent_relay::tool::calculator::eval_expression_tool;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = AgentRegistry::builder()
//!     .agent(AgentDefinition::simple("Data", "Answer questions.").with_handoff("Calculator"))
//!     .agent(
//!         AgentDefinition::simple("Calculator", "Evaluate arithmetic.")
//!             .with_tool(eval_expression_tool()),
//!     )
//!     .build()?;
//!
//! let model = ScriptedProvider::new()
//!     .then_for("Data", Generation::Handoff(HandoffRequest::new("Calculator")))
//!     .then_for(
//!         "Calculator",
//!         Generation::ToolCalls(vec![ToolCall::new(
//!             "call_1",
//!             "eval_expression",
//!             serde_json::json!({"expression": "((2*8)^2)/3"}),
//!         )]),
//!     )
//!     .then_for("Calculator", Generation::Text("85.33333333333333".into()));
//!
//! let runner = Runner::new(Arc::new(registry), model, RunEnv::default());
//! let result = runner.run("Data", "Compute ((2*8)^2)/3").await?;
//!
//! assert_eq!(result.last_agent, "Calculator");
//! assert_eq!(result.final_output, FinalOutput::Text("85.33333333333333".into()));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod guardrail;
pub mod handoff;
pub mod items;
pub mod manifest;
pub mod provider;
pub mod registry;
pub mod result;
pub mod retry;
pub mod runner;
pub mod schema;
pub mod tool;
pub mod trace;
pub mod usage;

pub use agent::{AgentDefinition, ModelSettings};
pub use config::{ConfigBuilder, Credential, GuardrailTimeoutPolicy, RetryConfig, RuntimeConfig};
pub use context::{Turn, TurnOutcome};
pub use error::{
    ConfigError, GenerationError, HandoffErrorKind, RegistryError, Result, RunError, ToolError,
    ToolErrorKind,
};
pub use guardrail::{
    AgentGuardrail, GuardrailEngine, GuardrailRecord, GuardrailSpec, GuardrailVerdict,
    InputGuardrail, MaxLengthGuardrail, PatternBlockGuardrail,
};
pub use handoff::{HandoffRequest, HandoffTarget, RECOMMENDED_PROMPT_PREFIX};
pub use items::{Message, Role, ToolCall};
pub use manifest::Manifest;
pub use provider::{
    Generation, GenerationRequest, GenerationResponse, ModelService, OpenAIProvider, ScriptStep,
    ScriptedProvider,
};
pub use registry::AgentRegistry;
pub use result::{FinalOutput, RunFailure, RunResult};
pub use runner::{RunEnv, Runner};
pub use tool::hosted::{HostedProviders, RetrievalProvider, WebSearchProvider};
pub use tool::{OpenAIHostedProvider, ToolOutput, ToolSpec};
pub use usage::{Usage, UsageStats};

// Re-export Tower traits that users need
pub use tower::{Service, ServiceExt};

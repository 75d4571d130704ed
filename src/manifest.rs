//! Agent manifests
//!
//! A manifest declares a whole agent topology in TOML: the agents, their
//! tools, handoffs, guardrails and output schemas, the default entry agent,
//! and optionally the runtime configuration.
//!
//! ```toml
//! entry = "Data"
//!
//! [[agents]]
//! name = "Data"
//! instructions = "Answer questions about the Enterprise."
//! handoffs = ["Calculator"]
//!
//! [[agents.tools]]
//! type = "file_search"
//! corpus_ids = ["vs_enterprise"]
//! max_results = 3
//!
//! [[agents.guardrails]]
//! name = "Tasha Yar"
//! type = "agent"
//! agent = "Yar"
//!
//! [[agents]]
//! name = "Calculator"
//! instructions = "Evaluate arithmetic."
//! handoff_description = "Performs arithmetic."
//! temperature = 0.0
//! tools = [{ type = "eval_expression" }]
//!
//! [[agents]]
//! name = "Yar"
//! instructions = "Block questions that are not about Star Trek."
//! output_schema = "block_verdict"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::agent::{AgentDefinition, ModelSettings};
use crate::config::RuntimeConfig;
use crate::error::RegistryError;
use crate::guardrail::{
    AgentGuardrail, GuardrailSpec, InputGuardrail, MaxLengthGuardrail, PatternBlockGuardrail,
};
use crate::handoff::HandoffTarget;
use crate::registry::AgentRegistry;
use crate::schema::OutputSchema;
use crate::tool::calculator::eval_expression_tool;
use crate::tool::ToolSpec;

fn default_max_results() -> usize {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Default entry agent; the first agent when absent
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub runtime: Option<RuntimeConfig>,
    pub agents: Vec<AgentDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentDecl {
    pub name: String,
    pub instructions: String,
    #[serde(default)]
    pub handoff_description: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
    #[serde(default)]
    pub handoffs: Vec<HandoffDecl>,
    #[serde(default)]
    pub guardrails: Vec<GuardrailDecl>,
    #[serde(default)]
    pub output_schema: Option<OutputDecl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDecl {
    EvalExpression,
    FileSearch {
        corpus_ids: Vec<String>,
        #[serde(default = "default_max_results")]
        max_results: usize,
    },
    WebSearch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HandoffDecl {
    Name(String),
    Target(HandoffTarget),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailDecl {
    pub name: String,
    #[serde(default = "default_true")]
    pub abort_on_trigger: bool,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(flatten)]
    pub kind: GuardrailKindDecl,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardrailKindDecl {
    Pattern {
        patterns: Vec<String>,
    },
    MaxLength {
        max_length: usize,
    },
    Agent {
        agent: String,
        #[serde(default)]
        triggered_field: Option<String>,
        #[serde(default)]
        rationale_field: Option<String>,
    },
}

/// `"block_verdict"` or an inline `{ name, schema }` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputDecl {
    Builtin(String),
    Inline { name: String, schema: Value },
}

impl Manifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Manifest(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, RegistryError> {
        let manifest: Manifest =
            toml::from_str(contents).map_err(|e| RegistryError::Manifest(e.to_string()))?;
        if manifest.agents.is_empty() {
            return Err(RegistryError::Manifest("no agents declared".to_string()));
        }
        if let Some(runtime) = &manifest.runtime {
            runtime
                .validate()
                .map_err(|e| RegistryError::Manifest(e.to_string()))?;
        }
        Ok(manifest)
    }

    /// Declared entry agent, else the first agent.
    pub fn entry_agent(&self) -> Option<&str> {
        self.entry
            .as_deref()
            .or_else(|| self.agents.first().map(|a| a.name.as_str()))
    }

    /// Build and validate the registry.
    pub fn build_registry(&self) -> Result<AgentRegistry, RegistryError> {
        let agents = self
            .agents
            .iter()
            .map(AgentDecl::to_definition)
            .collect::<Result<Vec<_>, _>>()?;
        let registry = AgentRegistry::builder().agents(agents).build()?;
        if let Some(entry) = &self.entry {
            if !registry.contains(entry) {
                return Err(RegistryError::Manifest(format!(
                    "entry agent '{}' is not declared",
                    entry
                )));
            }
        }
        Ok(registry)
    }
}

impl AgentDecl {
    fn to_definition(&self) -> Result<AgentDefinition, RegistryError> {
        let mut agent = AgentDefinition::simple(&self.name, &self.instructions);
        agent.handoff_description = self.handoff_description.clone();
        agent.settings = ModelSettings {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: self.model.clone(),
        };
        agent.tools = self.tools.iter().map(ToolDecl::to_spec).collect();
        agent.handoffs = self
            .handoffs
            .iter()
            .map(|h| match h {
                HandoffDecl::Name(name) => HandoffTarget::new(name),
                HandoffDecl::Target(target) => target.clone(),
            })
            .collect();
        agent.input_guardrails = self.guardrails.iter().map(GuardrailDecl::to_spec).collect();
        agent.output_schema = match &self.output_schema {
            None => None,
            Some(OutputDecl::Builtin(name)) if name == "block_verdict" => {
                Some(AgentGuardrail::output_schema())
            }
            Some(OutputDecl::Builtin(other)) => {
                return Err(RegistryError::Manifest(format!(
                    "agent '{}': unknown output schema '{}'",
                    self.name, other
                )))
            }
            Some(OutputDecl::Inline { name, schema }) => {
                Some(OutputSchema::new(name.clone(), schema.clone()))
            }
        };
        Ok(agent)
    }
}

impl ToolDecl {
    fn to_spec(&self) -> ToolSpec {
        match self {
            ToolDecl::EvalExpression => eval_expression_tool(),
            ToolDecl::FileSearch {
                corpus_ids,
                max_results,
            } => ToolSpec::file_search(corpus_ids.clone(), *max_results),
            ToolDecl::WebSearch => ToolSpec::web_search(),
        }
    }
}

impl GuardrailDecl {
    fn to_spec(&self) -> GuardrailSpec {
        let check: Arc<dyn InputGuardrail> = match &self.kind {
            GuardrailKindDecl::Pattern { patterns } => {
                Arc::new(PatternBlockGuardrail::new(patterns.clone()))
            }
            GuardrailKindDecl::MaxLength { max_length } => {
                Arc::new(MaxLengthGuardrail::new(*max_length))
            }
            GuardrailKindDecl::Agent {
                agent,
                triggered_field,
                rationale_field,
            } => {
                let mut guard = AgentGuardrail::new(agent);
                if triggered_field.is_some() || rationale_field.is_some() {
                    guard = guard.with_fields(
                        triggered_field.as_deref().unwrap_or("is_blocked"),
                        rationale_field.as_deref().unwrap_or("reasoning"),
                    );
                }
                Arc::new(guard)
            }
        };
        let mut spec = GuardrailSpec::new(&self.name, check);
        spec.abort_on_trigger = self.abort_on_trigger;
        spec.timeout = self.timeout_ms.map(Duration::from_millis);
        spec
    }
}

//! Generation contract
//!
//! The model is opaque to the runtime. It is reached through a Tower service
//! taking a [`GenerationRequest`] and answering with a [`GenerationResponse`]
//! whose payload is one of the tagged [`Generation`] variants.
//!
//! - `ModelService`: boxed `Service<GenerationRequest, Response = GenerationResponse, Error = BoxError>`
//! - Implementations: [`OpenAIProvider`] (chat completions over async-openai)
//!   and [`ScriptedProvider`] (deterministic script for tests and offline demos)
//!
//! Services report failures as `BoxError`; a boxed [`GenerationError`] keeps
//! its classification when the runner converts it back.

mod openai;
mod scripted;

pub use openai::OpenAIProvider;
pub use scripted::{ScriptStep, ScriptedProvider};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::util::BoxCloneService;
use tower::BoxError;

use crate::agent::ModelSettings;
use crate::error::GenerationError;
use crate::handoff::{AdvertisedHandoff, HandoffRequest};
use crate::items::{Message, ToolCall};
use crate::schema::OutputSchema;
use crate::tool::ToolSpec;
use crate::usage::Usage;

/// Boxed model service used by the runner.
pub type ModelService = BoxCloneService<GenerationRequest, GenerationResponse, BoxError>;

/// A tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&ToolSpec> for ToolSchema {
    fn from(spec: &ToolSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            parameters: spec.parameters.clone(),
        }
    }
}

/// Everything a generation needs for one agent turn.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Name of the active agent
    pub agent: String,
    pub model: String,
    pub instructions: String,
    pub history: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub handoffs: Vec<AdvertisedHandoff>,
    pub output_schema: Option<OutputSchema>,
    pub settings: ModelSettings,
}

/// What the model produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Generation {
    /// Free-text final output
    Text(String),
    /// One or more tool calls, in issue order
    ToolCalls(Vec<ToolCall>),
    /// Delegate the rest of the run
    Handoff(HandoffRequest),
    /// JSON final output for agents with an output schema
    Structured(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    pub generation: Generation,
    pub usage: Usage,
}

impl GenerationResponse {
    pub fn new(generation: Generation, usage: Usage) -> Self {
        Self { generation, usage }
    }
}

/// Recover a typed error from a service error.
pub fn classify_error(error: BoxError) -> GenerationError {
    match error.downcast::<GenerationError>() {
        Ok(e) => *e,
        Err(other) => match other.downcast::<tokio::time::error::Elapsed>() {
            Ok(_) => GenerationError::Unavailable("generation timed out".to_string()),
            Err(other) => GenerationError::Unavailable(other.to_string()),
        },
    }
}

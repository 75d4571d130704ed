//! Error types for the orchestration runtime
//!
//! Errors fall in two groups. [`RunError`] is fatal to a run and ends it in the
//! `Aborted` state. [`ToolError`] is never fatal: it is rendered into the
//! conversation so the active agent can reason over it on its next turn.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for the runtime
pub type Result<T> = std::result::Result<T, RunError>;

/// Why a handoff was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffErrorKind {
    /// The target is not in the active agent's declared handoff set.
    UnauthorizedTarget,
    /// The target is declared but no agent with that name is registered.
    UnknownTarget,
}

/// Fatal run errors.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// An abort-on-trigger input guardrail fired
    #[error("Input guardrail '{guardrail}' triggered: {rationale}")]
    GuardrailTripped { guardrail: String, rationale: String },

    /// Handoff to a target the active agent may not reach
    #[error("Handoff error ({kind:?}): {from} -> {target}")]
    Handoff {
        kind: HandoffErrorKind,
        from: String,
        target: String,
    },

    /// Terminal output did not match the agent's declared output schema
    #[error("Output validation failed for agent '{agent}': {message}")]
    OutputValidationFailed { agent: String, message: String },

    /// The run used up its turn budget
    #[error("Maximum turns exceeded: {max_turns}")]
    TurnLimitExceeded { max_turns: usize },

    /// The generation contract failed and retries (if any) were exhausted
    #[error("Generation unavailable: {message}")]
    GenerationUnavailable { message: String },

    /// The run was cancelled through its cancellation token
    #[error("Run cancelled")]
    Cancelled,

    /// The entry agent is not registered
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Invalid registry or manifest
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RunError {
    /// Short, stable name of the error kind, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::GuardrailTripped { .. } => "guardrail_tripped",
            RunError::Handoff { .. } => "handoff_error",
            RunError::OutputValidationFailed { .. } => "output_validation_failed",
            RunError::TurnLimitExceeded { .. } => "turn_limit_exceeded",
            RunError::GenerationUnavailable { .. } => "generation_unavailable",
            RunError::Cancelled => "cancelled",
            RunError::UnknownAgent(_) => "unknown_agent",
            RunError::Registry(_) => "registry_error",
            RunError::Config(_) => "config_error",
        }
    }
}

/// Errors raised while assembling an [`crate::registry::AgentRegistry`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("agent '{0}' is registered more than once")]
    DuplicateAgent(String),

    #[error("agent '{agent}' declares tool '{tool}' more than once")]
    DuplicateTool { agent: String, tool: String },

    #[error("agents '{first}' and '{second}' share the handoff tool '{tool}'")]
    HandoffNameCollision {
        first: String,
        second: String,
        tool: String,
    },

    #[error("agent '{agent}' hands off to unregistered agent '{target}'")]
    UnknownHandoffTarget { agent: String, target: String },

    #[error("agent '{agent}' uses guardrail agent '{guardrail_agent}' which is not registered")]
    UnknownGuardrailAgent {
        agent: String,
        guardrail_agent: String,
    },

    #[error("invalid manifest: {0}")]
    Manifest(String),
}

/// Classification of a tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments did not match the tool's argument schema.
    InvalidArguments,
    /// The arithmetic sandbox rejected a token or construct.
    UnsupportedExpression,
    /// Well-formed input that failed to evaluate (division by zero, overflow).
    ExecutionFailed,
    /// The hosted provider could not be reached or is not configured.
    ProviderUnavailable,
    /// The hosted provider refused the request.
    ProviderRejected,
    /// The model called a tool the active agent does not declare.
    UnknownTool,
    /// The call exceeded the configured tool timeout.
    Timeout,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::UnsupportedExpression => "unsupported_expression",
            ToolErrorKind::ExecutionFailed => "execution_failed",
            ToolErrorKind::ProviderUnavailable => "provider_unavailable",
            ToolErrorKind::ProviderRejected => "provider_rejected",
            ToolErrorKind::UnknownTool => "unknown_tool",
            ToolErrorKind::Timeout => "timeout",
        }
    }
}

/// A non-fatal tool failure, fed back to the agent as context.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn unsupported_expression(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::UnsupportedExpression, message)
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ExecutionFailed, message)
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ProviderUnavailable, message)
    }

    pub fn provider_rejected(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ProviderRejected, message)
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::invalid_arguments(e.to_string())
    }
}

/// Failure of the generation contract.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// Transient: network failure, timeout, overloaded backend.
    #[error("generation unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something the runtime cannot interpret.
    #[error("malformed generation: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::Unavailable(_))
    }
}

impl From<GenerationError> for RunError {
    fn from(e: GenerationError) -> Self {
        RunError::GenerationUnavailable {
            message: e.to_string(),
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Config(e.to_string())
    }
}

//! # Handoffs
//!
//! A handoff transfers the rest of a run from the active agent to another
//! registered agent. The conversation history is carried forward unchanged,
//! so the new agent sees every prior message. Handoffs are advertised to the
//! model as `transfer_to_<agent>` tools and consume turns from the same
//! counter as ordinary turns.

use serde::{Deserialize, Serialize};

use crate::agent::AgentDefinition;
use crate::error::{HandoffErrorKind, RunError};
use crate::registry::AgentRegistry;
use std::sync::Arc;

/// Prefix prepended to the instructions of agents that can hand off.
pub const RECOMMENDED_PROMPT_PREFIX: &str = "# System context\n\
You are part of a multi-agent system designed to make agent coordination and \
execution easy. Agents use two primary abstractions: **Agents** and \
**Handoffs**. An agent encompasses instructions and tools and can hand off a \
conversation to another agent when appropriate. Handoffs are achieved by \
calling a handoff function, generally named `transfer_to_<agent_name>`. \
Transfers between agents are handled seamlessly in the background; do not \
mention or draw attention to these transfers in your conversation with the user.\n";

/// A declared handoff edge from one agent to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffTarget {
    /// Name of the target agent.
    pub agent: String,
    /// Overrides the target's own handoff description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl HandoffTarget {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Name of the tool the model calls to take this handoff.
    pub fn tool_name(&self) -> String {
        transfer_tool_name(&self.agent)
    }
}

/// A handoff advertised to the model for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisedHandoff {
    pub agent: String,
    pub tool_name: String,
    pub description: String,
}

/// The model asked to hand off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Id of the `transfer_to_*` tool call, when the model issued one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

impl HandoffRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: None,
            call_id: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }
}

/// Data recorded for an accepted handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffData {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: Option<String>,
}

/// An accepted handoff: the active agent switches to `agent`.
#[derive(Debug, Clone)]
pub struct HandoffDecision {
    pub agent: Arc<AgentDefinition>,
    pub data: HandoffData,
}

/// `transfer_to_` plus the snake_case form of the agent name.
pub fn transfer_tool_name(agent: &str) -> String {
    let mut out = String::from("transfer_to_");
    let mut last_underscore = true;
    for c in agent.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') && out.len() > "transfer_to_".len() {
        out.pop();
    }
    out
}

/// Handoff targets of `agent` as the model sees them.
pub fn advertised_handoffs(agent: &AgentDefinition, registry: &AgentRegistry) -> Vec<AdvertisedHandoff> {
    agent
        .handoffs
        .iter()
        .map(|target| {
            let description = target
                .description
                .clone()
                .or_else(|| {
                    registry
                        .get(&target.agent)
                        .and_then(|a| a.handoff_description.clone())
                })
                .unwrap_or_else(|| format!("Hand off to the {} agent.", target.agent));
            AdvertisedHandoff {
                agent: target.agent.clone(),
                tool_name: target.tool_name(),
                description,
            }
        })
        .collect()
}

/// Instructions for `agent`, with the handoff prefix when it can delegate.
pub fn instructions_with_handoffs(agent: &AgentDefinition, handoffs: &[AdvertisedHandoff]) -> String {
    if handoffs.is_empty() {
        return agent.instructions.clone();
    }
    let mut text = String::from(RECOMMENDED_PROMPT_PREFIX);
    text.push('\n');
    text.push_str(&agent.instructions);
    text.push_str("\n\nYou can hand off to:\n");
    for h in handoffs {
        text.push_str(&format!("- {} (`{}`): {}\n", h.agent, h.tool_name, h.description));
    }
    text
}

/// Validates handoff requests against the active agent's declared targets.
pub struct HandoffResolver<'a> {
    registry: &'a AgentRegistry,
}

impl<'a> HandoffResolver<'a> {
    pub fn new(registry: &'a AgentRegistry) -> Self {
        Self { registry }
    }

    /// Agent name a request refers to. The target is an agent name or, when
    /// the model called an unadvertised `transfer_to_*` tool, that tool name.
    fn target_name(&self, target: &str) -> String {
        if self.registry.contains(target) {
            return target.to_string();
        }
        self.registry
            .by_transfer_tool(target)
            .map(|agent| agent.name.clone())
            .unwrap_or_else(|| target.to_string())
    }

    pub fn resolve(
        &self,
        current: &AgentDefinition,
        request: &HandoffRequest,
    ) -> Result<HandoffDecision, RunError> {
        let target = self.target_name(&request.target);
        if !current.can_hand_off_to(&target) {
            return Err(RunError::Handoff {
                kind: HandoffErrorKind::UnauthorizedTarget,
                from: current.name.clone(),
                target,
            });
        }
        let Some(agent) = self.registry.get(&target) else {
            return Err(RunError::Handoff {
                kind: HandoffErrorKind::UnknownTarget,
                from: current.name.clone(),
                target,
            });
        };
        Ok(HandoffDecision {
            agent,
            data: HandoffData {
                from_agent: current.name.clone(),
                to_agent: target,
                reason: request.reason.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AgentRegistry;
    use pretty_assertions::assert_eq;

    fn registry() -> AgentRegistry {
        AgentRegistry::builder()
            .agent(
                AgentDefinition::simple("Data", "Answer questions").with_handoff("Calculator"),
            )
            .agent(
                AgentDefinition::simple("Calculator", "Do math")
                    .with_handoff_description("Performs arithmetic"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_transfer_tool_name() {
        assert_eq!(transfer_tool_name("Calculator"), "transfer_to_calculator");
        assert_eq!(
            transfer_tool_name("Lt. Cmdr. Data"),
            "transfer_to_lt_cmdr_data"
        );
        assert_eq!(
            transfer_tool_name("Tasha Yar Guardrail"),
            "transfer_to_tasha_yar_guardrail"
        );
    }

    #[test]
    fn test_resolve_declared_target() {
        let registry = registry();
        let data = registry.get("Data").unwrap();
        let decision = HandoffResolver::new(&registry)
            .resolve(&data, &HandoffRequest::new("Calculator").with_reason("math"))
            .unwrap();
        let HandoffDecision { agent, data } = decision;
        assert_eq!(agent.name, "Calculator");
        assert_eq!(data.from_agent, "Data");
        assert_eq!(data.reason.as_deref(), Some("math"));
    }

    #[test]
    fn test_resolve_undeclared_target_is_unauthorized() {
        let registry = registry();
        let calc = registry.get("Calculator").unwrap();
        let err = HandoffResolver::new(&registry)
            .resolve(&calc, &HandoffRequest::new("Data"))
            .unwrap_err();
        assert!(matches!(
            err,
            RunError::Handoff {
                kind: HandoffErrorKind::UnauthorizedTarget,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_by_transfer_tool_name() {
        let registry = registry();
        let data = registry.get("Data").unwrap();
        let decision = HandoffResolver::new(&registry)
            .resolve(&data, &HandoffRequest::new("transfer_to_calculator"))
            .unwrap();
        assert_eq!(decision.data.to_agent, "Calculator");

        let calc = registry.get("Calculator").unwrap();
        let err = HandoffResolver::new(&registry)
            .resolve(&calc, &HandoffRequest::new("transfer_to_data"))
            .unwrap_err();
        match err {
            RunError::Handoff { kind, target, .. } => {
                assert_eq!(kind, HandoffErrorKind::UnauthorizedTarget);
                assert_eq!(target, "Data");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_advertised_handoffs_use_target_description() {
        let registry = registry();
        let data = registry.get("Data").unwrap();
        let advertised = advertised_handoffs(&data, &registry);
        assert_eq!(
            advertised,
            vec![AdvertisedHandoff {
                agent: "Calculator".into(),
                tool_name: "transfer_to_calculator".into(),
                description: "Performs arithmetic".into(),
            }]
        );

        let text = instructions_with_handoffs(&data, &advertised);
        assert!(text.starts_with("# System context"));
        assert!(text.contains("Answer questions"));
        assert!(text.contains("transfer_to_calculator"));
    }

    #[test]
    fn test_instructions_without_handoffs_unchanged() {
        let registry = registry();
        let calc = registry.get("Calculator").unwrap();
        assert_eq!(instructions_with_handoffs(&calc, &[]), "Do math");
    }
}

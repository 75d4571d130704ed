//! Name → agent registry.
//!
//! The registry is built once and validated as a whole: agent names are
//! unique, tool names are unique within their agent, and every handoff target
//! and guardrail sub-agent names a registered agent. Every agent also maps to
//! a distinct `transfer_to_<agent>` tool name, and no declared tool shadows a
//! handoff tool. After `build` it is immutable and shared as
//! `Arc<AgentRegistry>` across concurrent runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::agent::AgentDefinition;
use crate::error::RegistryError;
use crate::handoff::transfer_tool_name;

#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<AgentDefinition>>,
    /// Registration order, for listing
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn builder() -> AgentRegistryBuilder {
        AgentRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentDefinition>> {
        self.agents.get(name).cloned()
    }

    /// Agent whose handoff tool is `tool_name`, e.g. `transfer_to_calculator`.
    pub fn by_transfer_tool(&self, tool_name: &str) -> Option<Arc<AgentDefinition>> {
        self.order
            .iter()
            .find(|name| transfer_tool_name(name) == tool_name)
            .and_then(|name| self.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Agent names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AgentRegistryBuilder {
    agents: Vec<AgentDefinition>,
}

impl AgentRegistryBuilder {
    pub fn agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents(mut self, agents: impl IntoIterator<Item = AgentDefinition>) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn build(self) -> Result<AgentRegistry, RegistryError> {
        let mut names = HashSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name.as_str()) {
                return Err(RegistryError::DuplicateAgent(agent.name.clone()));
            }
        }

        let mut transfer_names: HashMap<String, &str> = HashMap::new();
        for agent in &self.agents {
            let tool = transfer_tool_name(&agent.name);
            if let Some(first) = transfer_names.insert(tool.clone(), agent.name.as_str()) {
                return Err(RegistryError::HandoffNameCollision {
                    first: first.to_string(),
                    second: agent.name.clone(),
                    tool,
                });
            }
        }

        for agent in &self.agents {
            let mut tools = HashSet::new();
            for tool in &agent.tools {
                if !tools.insert(tool.name.as_str()) {
                    return Err(RegistryError::DuplicateTool {
                        agent: agent.name.clone(),
                        tool: tool.name.clone(),
                    });
                }
            }
            for target in &agent.handoffs {
                if tools.contains(target.tool_name().as_str()) {
                    return Err(RegistryError::DuplicateTool {
                        agent: agent.name.clone(),
                        tool: target.tool_name(),
                    });
                }
                if !names.contains(target.agent.as_str()) {
                    return Err(RegistryError::UnknownHandoffTarget {
                        agent: agent.name.clone(),
                        target: target.agent.clone(),
                    });
                }
            }
            for guardrail in &agent.input_guardrails {
                if let Some(sub) = guardrail.check.sub_agent() {
                    if !names.contains(sub) {
                        return Err(RegistryError::UnknownGuardrailAgent {
                            agent: agent.name.clone(),
                            guardrail_agent: sub.to_string(),
                        });
                    }
                }
            }
        }

        let order: Vec<String> = self.agents.iter().map(|a| a.name.clone()).collect();
        let agents = self
            .agents
            .into_iter()
            .map(|a| (a.name.clone(), Arc::new(a)))
            .collect();
        Ok(AgentRegistry { agents, order })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrail::{AgentGuardrail, GuardrailSpec};
    use crate::tool::calculator::eval_expression_tool;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_and_lookup() {
        let registry = AgentRegistry::builder()
            .agent(AgentDefinition::simple("Data", "d").with_handoff("Calculator"))
            .agent(AgentDefinition::simple("Calculator", "c"))
            .build()
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Data", "Calculator"]);
        assert_eq!(registry.get("Calculator").unwrap().name, "Calculator");
        assert!(registry.get("Picard").is_none());
    }

    #[test]
    fn test_duplicate_agent() {
        let err = AgentRegistry::builder()
            .agent(AgentDefinition::simple("Data", "a"))
            .agent(AgentDefinition::simple("Data", "b"))
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateAgent("Data".into()));
    }

    #[test]
    fn test_duplicate_tool() {
        let err = AgentRegistry::builder()
            .agent(
                AgentDefinition::simple("Calculator", "c")
                    .with_tool(eval_expression_tool())
                    .with_tool(eval_expression_tool()),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool { .. }));
    }

    #[test]
    fn test_transfer_name_collision() {
        let err = AgentRegistry::builder()
            .agent(AgentDefinition::simple("Lt. Data", "a"))
            .agent(AgentDefinition::simple("Lt Data", "b"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::HandoffNameCollision {
                first: "Lt. Data".into(),
                second: "Lt Data".into(),
                tool: "transfer_to_lt_data".into(),
            }
        );
    }

    #[test]
    fn test_tool_shadowing_handoff_is_rejected() {
        let shadow = crate::tool::ToolSpec::function(
            "transfer_to_calculator",
            "not a handoff",
            serde_json::json!({"type": "object"}),
            |_| Ok(serde_json::Value::Null),
        );
        let err = AgentRegistry::builder()
            .agent(
                AgentDefinition::simple("Data", "d")
                    .with_tool(shadow)
                    .with_handoff("Calculator"),
            )
            .agent(AgentDefinition::simple("Calculator", "c"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateTool {
                agent: "Data".into(),
                tool: "transfer_to_calculator".into(),
            }
        );
    }

    #[test]
    fn test_lookup_by_transfer_tool() {
        let registry = AgentRegistry::builder()
            .agent(AgentDefinition::simple("Lt. Cmdr. Data", "d"))
            .build()
            .unwrap();
        let agent = registry.by_transfer_tool("transfer_to_lt_cmdr_data").unwrap();
        assert_eq!(agent.name, "Lt. Cmdr. Data");
        assert!(registry.by_transfer_tool("transfer_to_worf").is_none());
    }

    #[test]
    fn test_unknown_handoff_target() {
        let err = AgentRegistry::builder()
            .agent(AgentDefinition::simple("Data", "d").with_handoff("Calculator"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownHandoffTarget {
                agent: "Data".into(),
                target: "Calculator".into()
            }
        );
    }

    #[test]
    fn test_unknown_guardrail_agent() {
        let err = AgentRegistry::builder()
            .agent(AgentDefinition::simple("Data", "d").with_input_guardrail(
                GuardrailSpec::new("yar", std::sync::Arc::new(AgentGuardrail::new("Yar"))),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownGuardrailAgent { .. }));
    }
}

// registry.rs - The canonical registry of governed actions.
//
// Every action that can be gated has a stable id, an operation kind (what an
// executor does with it), and a risk tier (how the loader treats it when the
// policy capsule is missing or stale). Tokens can only be minted for
// registered ids.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How dangerous an action is, used for degraded-mode enforcement.
///
/// Variants are ordered from least to most risky, so `tier <= RiskTier::LowRisk`
/// style comparisons work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    ReadOnly,
    LowRisk,
    MediumRisk,
    HighRisk,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::ReadOnly => write!(f, "read_only"),
            RiskTier::LowRisk => write!(f, "low_risk"),
            RiskTier::MediumRisk => write!(f, "medium_risk"),
            RiskTier::HighRisk => write!(f, "high_risk"),
        }
    }
}

impl FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_only" => Ok(RiskTier::ReadOnly),
            "low_risk" => Ok(RiskTier::LowRisk),
            "medium_risk" => Ok(RiskTier::MediumRisk),
            "high_risk" => Ok(RiskTier::HighRisk),
            other => Err(format!("unknown risk tier '{}'", other)),
        }
    }
}

/// The kind of side-effecting operation an action performs.
///
/// Executors check this so a token minted for a model call cannot be spent
/// on a tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    MemoryRead,
    MemoryWrite,
    ModelInvocation,
    ToolInvocation,
    JobExecution,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::MemoryRead => write!(f, "memory_read"),
            ActionKind::MemoryWrite => write!(f, "memory_write"),
            ActionKind::ModelInvocation => write!(f, "model_invocation"),
            ActionKind::ToolInvocation => write!(f, "tool_invocation"),
            ActionKind::JobExecution => write!(f, "job_execution"),
        }
    }
}

/// One registered action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionDefinition {
    /// Canonical id (e.g., "memory_write_node").
    pub action_id: String,
    /// What an executor does when it spends a token for this action.
    pub kind: ActionKind,
    /// Risk tier for degraded-mode enforcement.
    pub risk_tier: RiskTier,
    /// Free-form description for operators.
    #[serde(default)]
    pub description: String,
}

impl ActionDefinition {
    pub fn new(action_id: impl Into<String>, kind: ActionKind, risk_tier: RiskTier) -> Self {
        Self {
            action_id: action_id.into(),
            kind,
            risk_tier,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Registry of governed actions, keyed by action id.
///
/// `BTreeMap` keeps iteration order stable for listings and tests.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    actions: BTreeMap<String, ActionDefinition>,
}

impl ActionRegistry {
    /// Create an empty registry (nothing can be minted).
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in action set covering memory, model, tool, and job operations.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for def in [
            ActionDefinition::new("memory_read_node", ActionKind::MemoryRead, RiskTier::ReadOnly)
                .with_description("Read a node from the memory graph"),
            ActionDefinition::new("memory_search", ActionKind::MemoryRead, RiskTier::ReadOnly)
                .with_description("Search the memory graph"),
            ActionDefinition::new("memory_write_node", ActionKind::MemoryWrite, RiskTier::MediumRisk)
                .with_description("Create or update a memory node"),
            ActionDefinition::new("memory_create_edge", ActionKind::MemoryWrite, RiskTier::MediumRisk)
                .with_description("Create an edge between memory nodes"),
            ActionDefinition::new("memory_delete_node", ActionKind::MemoryWrite, RiskTier::HighRisk)
                .with_description("Delete a memory node"),
            ActionDefinition::new("model_invocation", ActionKind::ModelInvocation, RiskTier::MediumRisk)
                .with_description("Invoke a model adapter"),
            ActionDefinition::new("tool_invocation", ActionKind::ToolInvocation, RiskTier::HighRisk)
                .with_description("Invoke an external tool"),
            ActionDefinition::new("job_run", ActionKind::JobExecution, RiskTier::MediumRisk)
                .with_description("Run a checkpointed multi-stage job"),
        ] {
            registry.register(def);
        }
        registry
    }

    /// Register (or replace) an action definition.
    pub fn register(&mut self, definition: ActionDefinition) {
        self.actions
            .insert(definition.action_id.clone(), definition);
    }

    pub fn get(&self, action_id: &str) -> Option<&ActionDefinition> {
        self.actions.get(action_id)
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.actions.contains_key(action_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionDefinition> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_each_kind() {
        let registry = ActionRegistry::with_defaults();
        assert_eq!(
            registry.get("model_invocation").unwrap().kind,
            ActionKind::ModelInvocation
        );
        assert_eq!(
            registry.get("tool_invocation").unwrap().kind,
            ActionKind::ToolInvocation
        );
        assert_eq!(
            registry.get("memory_read_node").unwrap().risk_tier,
            RiskTier::ReadOnly
        );
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = ActionRegistry::with_defaults();
        let before = registry.len();
        registry.register(ActionDefinition::new(
            "tool_invocation",
            ActionKind::ToolInvocation,
            RiskTier::LowRisk,
        ));
        assert_eq!(registry.len(), before);
        assert_eq!(
            registry.get("tool_invocation").unwrap().risk_tier,
            RiskTier::LowRisk
        );
    }

    #[test]
    fn risk_tier_ordering_and_parsing() {
        assert!(RiskTier::ReadOnly < RiskTier::HighRisk);
        assert_eq!("medium_risk".parse::<RiskTier>().unwrap(), RiskTier::MediumRisk);
        assert!("extreme".parse::<RiskTier>().is_err());
        assert_eq!(RiskTier::HighRisk.to_string(), "high_risk");
    }

    #[test]
    fn kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ActionKind::ModelInvocation).unwrap();
        assert_eq!(json, "\"model_invocation\"");
    }
}

//! Skill registry and execution model.
//!
//! Grounded on `skills/base_skill.py` (the `name`/`description`/
//! `parameters`/`execute` contract) and `skills/skill_registry.py`
//! (registration, lookup, and the "errors never escape `execute`"
//! boundary — unknown names and panics-as-errors both resolve to a
//! stringified error message rather than propagating).

use crate::conductor::client_wrapper::ToolDefinition;
use crate::conductor::error::OrchestratorError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A skill the orchestrator can dispatch to by name. Parameters are
/// declared as a JSON-Schema object (`{"type": "object", "properties":
/// {...}, "required": [...]}`); the orchestrator filters LLM-supplied
/// arguments down to `properties.keys()` before calling [`execute`](Skill::execute).
#[async_trait]
pub trait Skill: Send + Sync {
    /// Unique name used in tool-call dispatch.
    fn name(&self) -> &str;

    /// Human-readable description surfaced to the LLM.
    fn description(&self) -> &str;

    /// JSON-Schema object describing accepted parameters.
    fn parameters(&self) -> Value;

    /// Run the skill with `args` already filtered to declared
    /// properties. Implementations should return a description of the
    /// failure as `Ok` text where possible; the registry additionally
    /// catches unexpected errors and stringifies them so a caller never
    /// needs to branch on `Err` from the registry's perspective.
    async fn execute(
        &self,
        args: HashMap<String, Value>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;

    /// Declared parameter names, used to filter LLM-supplied arguments.
    fn declared_params(&self) -> Vec<String> {
        self.parameters()
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Render as an OpenAI/Grok-style tool definition.
    fn to_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters(),
        }
    }
}

/// Registers skills by name and dispatches tool calls to them.
///
/// Matches the original's contract that `execute` never raises: an
/// unknown skill name or an error from the skill itself both resolve
/// to a human-readable error string rather than an `Err`.
#[derive(Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
}

impl SkillRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        SkillRegistry {
            skills: HashMap::new(),
        }
    }

    /// Register `skill`, overwriting any previous registration under
    /// the same name.
    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        self.skills.insert(skill.name().to_string(), skill);
    }

    /// Look up a skill by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(name).cloned()
    }

    /// All registered skills, in no particular order.
    pub fn all(&self) -> Vec<Arc<dyn Skill>> {
        self.skills.values().cloned().collect()
    }

    /// Tool definitions for every registered skill, restricted to
    /// `allowed` when given (the orchestrator's access-control filter).
    pub fn tool_definitions(&self, allowed: Option<&[String]>) -> Vec<ToolDefinition> {
        self.skills
            .values()
            .filter(|s| allowed.map_or(true, |a| a.iter().any(|name| name == s.name())))
            .map(|s| s.to_tool_definition())
            .collect()
    }

    /// Execute a named skill, filtering `args` down to its declared
    /// parameters first. Unknown skill names and execution errors are
    /// both folded into a plain error string rather than an `Err`.
    pub async fn execute(&self, name: &str, args: HashMap<String, Value>) -> String {
        let skill = match self.skills.get(name) {
            Some(s) => s.clone(),
            None => return format!("Error: {}", OrchestratorError::SkillNotFound(name.to_string())),
        };
        let declared = skill.declared_params();
        let filtered: HashMap<String, Value> = args
            .into_iter()
            .filter(|(k, _)| declared.iter().any(|d| d == k))
            .collect();
        match skill.execute(filtered).await {
            Ok(result) => result,
            Err(err) => format!("Error: {}", err),
        }
    }
}

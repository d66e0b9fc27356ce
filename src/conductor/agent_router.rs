//! Sub-agent delegation.
//!
//! Grounded on `agents/agent_router.py`: templates loaded via
//! `TemplateLoader`, a `delegate_to_agent` tool schema enumerating
//! agent names (excluding the reserved `"general"`), an isolated
//! message buffer per sub-agent run (system prompt + sliced
//! user/assistant history + the task), the sub-agent's own bounded
//! loop via [`crate::conductor::planner::run_bounded_loop`], and a
//! synthetic-summarization fallback when the first call produces no
//! text.

use crate::conductor::agent_template::{AgentTemplate, TemplateLoader};
use crate::conductor::client_wrapper::{ClientWrapper, Message, NativeToolCall, Role, ToolDefinition};
use crate::conductor::error::OrchestratorError;
use crate::conductor::planner::{AllowAllPolicy, AllowlistPolicy, Delegate, LoopContext, NoopObserver, PolicyEngine, run_bounded_loop};
use crate::conductor::skill::SkillRegistry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name reserved for the top-level orchestrator; never offered as a
/// delegation target.
pub const GENERAL_AGENT_NAME: &str = "general";

/// Tool name the orchestrator's tool list exposes for delegating to a
/// named sub-agent.
pub const DELEGATE_TOOL_NAME: &str = "delegate_to_agent";

/// Result of running a sub-agent: its textual output plus any tool
/// calls it made, surfaced to the parent turn as additional events.
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    /// The sub-agent's final text.
    pub text: String,
    /// Tool names the sub-agent invoked, in call order (used by the
    /// parent orchestrator to emit `tool_call` events, e.g.
    /// `"agent:research"`).
    pub events: Vec<String>,
}

/// Loads agent templates and runs delegated sub-agent turns.
pub struct AgentRouter {
    client: Arc<dyn ClientWrapper>,
    skills: Arc<SkillRegistry>,
    loader: TemplateLoader,
    agents: RwLock<HashMap<String, AgentTemplate>>,
}

impl AgentRouter {
    /// Build a router and perform the initial template load.
    pub async fn new(
        client: Arc<dyn ClientWrapper>,
        skills: Arc<SkillRegistry>,
        loader: TemplateLoader,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let agents = loader.load_all()?;
        Ok(AgentRouter {
            client,
            skills,
            loader,
            agents: RwLock::new(agents),
        })
    }

    /// Re-scan the template directories. Returns the number of
    /// templates now loaded.
    pub async fn reload(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let agents = self.loader.load_all()?;
        let count = agents.len();
        *self.agents.write().await = agents;
        Ok(count)
    }

    /// All agent names except the reserved `"general"`.
    pub async fn delegatable_agent_names(&self) -> Vec<String> {
        self.agents
            .read()
            .await
            .keys()
            .filter(|name| name.as_str() != GENERAL_AGENT_NAME)
            .cloned()
            .collect()
    }

    /// The `delegate_to_agent` tool definition, with `filter_agents`
    /// restricting the enumerated agent names when given (used to
    /// respect `allowed_skills`).
    pub async fn get_delegate_tool_definition(
        &self,
        filter_agents: Option<&[String]>,
    ) -> Option<ToolDefinition> {
        let mut names = self.delegatable_agent_names().await;
        if let Some(filter) = filter_agents {
            names.retain(|n| filter.iter().any(|f| f == n));
        }
        if names.is_empty() {
            return None;
        }
        Some(ToolDefinition {
            name: DELEGATE_TOOL_NAME.to_string(),
            description: "Delegate a task to a specialized sub-agent.".to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "agent": { "type": "string", "enum": names },
                    "task": { "type": "string", "description": "The task to hand off." }
                },
                "required": ["agent", "task"]
            }),
        })
    }

    /// Tool definitions available to `agent_name`'s own loop: every
    /// skill if the template's `skills` is `None`, else the declared
    /// subset.
    pub async fn get_tools_for_agent(&self, agent_name: &str) -> Vec<ToolDefinition> {
        let agents = self.agents.read().await;
        match agents.get(agent_name) {
            Some(template) => self.skills.tool_definitions(template.skills.as_deref()),
            None => vec![],
        }
    }

    /// Of the full agent set, which ones may be delegated to under an
    /// `allowed_skills` restriction: an agent qualifies only if every
    /// skill it uses is itself in `allowed_skills`.
    pub async fn get_allowed_agents(&self, allowed_skills: &[String]) -> Vec<String> {
        self.agents
            .read()
            .await
            .values()
            .filter(|tpl| tpl.name != GENERAL_AGENT_NAME)
            .filter(|tpl| match &tpl.skills {
                None => false,
                Some(skills) => skills.iter().all(|s| allowed_skills.iter().any(|a| a == s)),
            })
            .map(|tpl| tpl.name.clone())
            .collect()
    }

    /// Run `agent_name` against `task`, optionally seeded with the
    /// parent conversation's recent user/assistant turns.
    pub async fn run_agent(
        &self,
        agent_name: &str,
        task: &str,
        conversation_context: Option<&[Message]>,
    ) -> Result<AgentRunResult, Box<dyn std::error::Error + Send + Sync>> {
        let template = {
            let agents = self.agents.read().await;
            agents
                .get(agent_name)
                .cloned()
                .ok_or_else(|| OrchestratorError::AgentNotFound(agent_name.to_string()))?
        };

        let mut messages = Vec::new();
        if let Some(system_prompt) = &template.system_prompt {
            messages.push(Message::new(Role::System, system_prompt.clone()));
        }
        if let Some(context) = conversation_context {
            let relevant: Vec<&Message> = context
                .iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                .collect();
            let start = relevant.len().saturating_sub(template.context_window);
            for message in &relevant[start..] {
                messages.push((*message).clone());
            }
        }
        messages.push(Message::new(Role::User, task.to_string()));

        let tool_definitions = self.get_tools_for_agent(agent_name).await;
        let policy: Box<dyn PolicyEngine> = match &template.skills {
            Some(skills) => Box::new(AllowlistPolicy::new(skills.clone())),
            None => Box::new(AllowAllPolicy),
        };

        let outcome = run_bounded_loop(
            &mut messages,
            LoopContext {
                client: self.client.as_ref(),
                skills: &self.skills,
                tool_definitions,
                delegation_tool_names: vec![],
                policy: policy.as_ref(),
                observer: &NoopObserver,
                max_rounds: template.max_rounds,
            },
            None,
        )
        .await?;

        let events = outcome.tool_calls.iter().map(|t| t.name.clone()).collect();
        let mut text = outcome.final_message.content.to_string();

        if text.trim().is_empty() && !outcome.tool_calls.is_empty() {
            messages.push(Message::new(
                Role::User,
                "Summarize the results of the tool calls above for the user in a helpful final answer.",
            ));
            let summary = self.client.chat(&messages, None).await?;
            text = summary.content.to_string();
        }

        Ok(AgentRunResult { text, events })
    }
}

/// Adapts [`AgentRouter::run_agent`] to the [`Delegate`] trait so
/// [`crate::conductor::planner::run_bounded_loop`] can invoke delegations without
/// depending on `agent_router` directly.
pub struct RouterDelegate<'a> {
    /// The router performing delegated runs.
    pub router: &'a AgentRouter,
    /// The parent conversation, used to seed a sub-agent's context window.
    pub conversation_context: Option<&'a [Message]>,
}

#[async_trait]
impl<'a> Delegate for RouterDelegate<'a> {
    async fn delegate(&self, call: &NativeToolCall) -> String {
        let agent = call.arguments.get("agent").and_then(|v| v.as_str());
        let task = call.arguments.get("task").and_then(|v| v.as_str());
        match (agent, task) {
            (Some(agent), Some(task)) => {
                match self
                    .router
                    .run_agent(agent, task, self.conversation_context)
                    .await
                {
                    Ok(result) => result.text,
                    Err(err) => format!("[agent '{}' error: {}]", agent, err),
                }
            }
            _ => "delegate_to_agent call missing 'agent' or 'task' argument".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::client_wrapper::EchoClient;
    use std::fs;
    use tempfile::tempdir;

    fn write_builtin(dir: &std::path::Path, name: &str, contents: &str) {
        let builtin = dir.join("_builtin");
        fs::create_dir_all(&builtin).unwrap();
        fs::write(builtin.join(format!("{}.yaml", name)), contents).unwrap();
    }

    #[tokio::test]
    async fn general_excluded_from_delegate_tool() {
        let dir = tempdir().unwrap();
        write_builtin(
            dir.path(),
            "general",
            "name: general\ndescription: top level\nmodel: gpt-4\n",
        );
        write_builtin(
            dir.path(),
            "research",
            "name: research\ndescription: researches things\nmodel: gpt-4\n",
        );
        let router = AgentRouter::new(
            Arc::new(EchoClient::new("ok")),
            Arc::new(SkillRegistry::new()),
            TemplateLoader::new(dir.path()),
        )
        .await
        .unwrap();

        let tool = router.get_delegate_tool_definition(None).await.unwrap();
        let enum_values = tool.parameters_schema["properties"]["agent"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(enum_values.len(), 1);
        assert_eq!(enum_values[0], "research");
    }

    #[tokio::test]
    async fn run_agent_rejects_unknown_name() {
        let dir = tempdir().unwrap();
        write_builtin(
            dir.path(),
            "general",
            "name: general\ndescription: top level\nmodel: gpt-4\n",
        );
        let router = AgentRouter::new(
            Arc::new(EchoClient::new("ok")),
            Arc::new(SkillRegistry::new()),
            TemplateLoader::new(dir.path()),
        )
        .await
        .unwrap();
        let result = router.run_agent("ghost", "do something", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn run_agent_returns_echoed_text() {
        let dir = tempdir().unwrap();
        write_builtin(
            dir.path(),
            "research",
            "name: research\ndescription: researches things\nmodel: gpt-4\n",
        );
        let router = AgentRouter::new(
            Arc::new(EchoClient::new("the research result")),
            Arc::new(SkillRegistry::new()),
            TemplateLoader::new(dir.path()),
        )
        .await
        .unwrap();
        let result = router.run_agent("research", "look into X", None).await.unwrap();
        assert_eq!(result.text, "the research result");
    }
}

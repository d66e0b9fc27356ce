//! Delegating a task to a sub-agent: the sub-agent's own tool calls
//! surface back to the parent turn as `agent:<tool>` events.

use async_trait::async_trait;
use conductor::{
    CapturedEvent, ClientWrapper, CollectorChannel, Conductor, Config, Message, NativeToolCall,
    Role, Skill, SkillRegistry, ToolDefinition,
};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;
use tempfile::tempdir;

struct SearchWeb;

#[async_trait]
impl Skill for SearchWeb {
    fn name(&self) -> &str {
        "search_web"
    }
    fn description(&self) -> &str {
        "Searches the web for a query."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }
    async fn execute(&self, _args: HashMap<String, Value>) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok("three relevant results".to_string())
    }
}

struct ScriptedClient {
    responses: Mutex<Vec<Message>>,
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn chat(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(Message::new(Role::Assistant, "done"))
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(prompt.to_string())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn search_call() -> NativeToolCall {
    NativeToolCall {
        id: "call_search".to_string(),
        name: "search_web".to_string(),
        arguments: serde_json::json!({ "query": "recent results" }),
    }
}

#[tokio::test]
async fn delegated_sub_agent_tool_calls_surface_as_parent_events() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("_builtin")).unwrap();
    std::fs::write(
        dir.path().join("_builtin/general.yaml"),
        "name: general\ndescription: top level\nmodel: gpt-4\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("_builtin/research.yaml"),
        "name: research\ndescription: research sub-agent\nmodel: gpt-4\nskills: [search_web]\n",
    )
    .unwrap();

    let mut skills = SkillRegistry::new();
    skills.register(std::sync::Arc::new(SearchWeb));

    let mut sub_agent_tool_call = Message::new(Role::Assistant, "");
    sub_agent_tool_call.tool_calls = vec![search_call()];

    let client = ScriptedClient {
        responses: Mutex::new(vec![
            sub_agent_tool_call,
            Message::new(Role::Assistant, "Here's what research turned up."),
        ]),
    };

    let mut config = Config::default();
    config.agent_templates_dir = dir.path().to_path_buf();
    config.scripts_dir = dir.path().join("scripts");

    let conductor = Conductor::bootstrap(
        std::sync::Arc::new(client),
        std::sync::Arc::new(skills),
        "You are helpful.",
        config,
    )
    .await
    .unwrap();

    let channel = CollectorChannel::new();
    let reply = conductor
        .orchestrator
        .handle(&channel, "session-1", "look this up", None, false, None, Some("research"))
        .await
        .unwrap();

    assert_eq!(reply, "Here's what research turned up.");
    let events = channel.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        CapturedEvent::ToolCall { tool, .. } if tool == "agent:search_web"
    )));
}

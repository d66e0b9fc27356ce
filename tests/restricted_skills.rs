//! `allowed_skills` restricts both the tool list offered to the model
//! and, defense-in-depth, any call the model makes anyway.

use async_trait::async_trait;
use conductor::{
    ClientWrapper, CollectorChannel, Conductor, Config, Message, NativeToolCall, Role, Skill,
    SkillRegistry, ToolDefinition,
};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

struct CountingSkill {
    name: &'static str,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Skill for CountingSkill {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "A skill that counts how many times it actually ran."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _args: HashMap<String, Value>) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} ran", self.name))
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

fn tool_call(name: &str) -> NativeToolCall {
    NativeToolCall {
        id: format!("call_{}", name),
        name: name.to_string(),
        arguments: serde_json::json!({}),
    }
}

#[test]
fn disallowed_skill_is_excluded_from_the_offered_tool_list() {
    let allowed_calls = Arc::new(AtomicUsize::new(0));
    let disallowed_calls = Arc::new(AtomicUsize::new(0));
    let mut skills = SkillRegistry::new();
    skills.register(Arc::new(CountingSkill { name: "allowed_skill", calls: allowed_calls.clone() }));
    skills.register(Arc::new(CountingSkill { name: "disallowed_skill", calls: disallowed_calls.clone() }));

    let definitions = skills.tool_definitions(Some(&["allowed_skill".to_string()]));
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].name, "allowed_skill");
}

#[tokio::test]
async fn disallowed_skill_call_is_denied_and_never_executes() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("_builtin")).unwrap();
    std::fs::write(
        dir.path().join("_builtin/general.yaml"),
        "name: general\ndescription: top level\nmodel: gpt-4\n",
    )
    .unwrap();

    let allowed_calls = Arc::new(AtomicUsize::new(0));
    let disallowed_calls = Arc::new(AtomicUsize::new(0));
    let mut skills = SkillRegistry::new();
    skills.register(Arc::new(CountingSkill { name: "allowed_skill", calls: allowed_calls.clone() }));
    skills.register(Arc::new(CountingSkill { name: "disallowed_skill", calls: disallowed_calls.clone() }));

    // Simulates a model that ignores the tool list it was given and
    // asks for a skill outside the session's allowlist anyway.
    let mut bypass_attempt = Message::new(Role::Assistant, "");
    bypass_attempt.tool_calls = vec![tool_call("disallowed_skill")];
    let client = ScriptedClient {
        responses: Mutex::new(vec![bypass_attempt, Message::new(Role::Assistant, "Here's what I could do.")]),
    };

    let mut config = Config::default();
    config.agent_templates_dir = dir.path().to_path_buf();
    config.scripts_dir = dir.path().join("scripts");

    let conductor = Conductor::bootstrap(Arc::new(client), Arc::new(skills), "You are helpful.", config)
        .await
        .unwrap();

    let channel = CollectorChannel::new();
    let reply = conductor
        .orchestrator
        .handle(
            &channel,
            "session-1",
            "try the disallowed skill",
            None,
            false,
            Some(&["allowed_skill".to_string()]),
            None,
        )
        .await
        .unwrap();

    assert_eq!(reply, "Here's what I could do.");
    assert_eq!(disallowed_calls.load(Ordering::SeqCst), 0);
    assert_eq!(allowed_calls.load(Ordering::SeqCst), 0);
}

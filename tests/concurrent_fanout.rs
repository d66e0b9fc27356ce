//! Two regular skill calls requested in the same round run concurrently:
//! wall time should track the slower call, not the sum of both.

use async_trait::async_trait;
use conductor::{
    ClientWrapper, CollectorChannel, Conductor, Config, Message, NativeToolCall, Role, Skill,
    SkillRegistry, ToolDefinition,
};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::tempdir;

const DELAY_MS: u64 = 120;

struct SlowSkill {
    name: &'static str,
}

#[async_trait]
impl Skill for SlowSkill {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "A skill that sleeps before answering, to make fan-out timing observable."
    }
    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _args: HashMap<String, Value>) -> Result<String, Box<dyn Error + Send + Sync>> {
        tokio::time::sleep(Duration::from_millis(DELAY_MS)).await;
        Ok(format!("{} done", self.name))
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

#[tokio::test]
async fn regular_calls_in_one_round_run_concurrently() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("_builtin")).unwrap();
    std::fs::write(
        dir.path().join("_builtin/general.yaml"),
        "name: general\ndescription: top level\nmodel: gpt-4\n",
    )
    .unwrap();

    let mut skills = SkillRegistry::new();
    skills.register(std::sync::Arc::new(SlowSkill { name: "slow_a" }));
    skills.register(std::sync::Arc::new(SlowSkill { name: "slow_b" }));

    let mut first_response = Message::new(Role::Assistant, "");
    first_response.tool_calls = vec![tool_call("slow_a"), tool_call("slow_b")];
    let client = ScriptedClient {
        responses: Mutex::new(vec![first_response, Message::new(Role::Assistant, "both done")]),
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
    let start = Instant::now();
    let reply = conductor
        .orchestrator
        .handle(&channel, "session-1", "run both", None, false, None, None)
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(reply, "both done");
    // Sequential execution would take at least 2 * DELAY_MS; a concurrent
    // fan-out stays close to one DELAY_MS plus scheduling overhead.
    assert!(
        elapsed < Duration::from_millis(DELAY_MS * 2 - 20),
        "fan-out took {:?}, expected well under {}ms (sequential bound)",
        elapsed,
        DELAY_MS * 2
    );
}

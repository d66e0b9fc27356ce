//! The conversation orchestrator: the crate's top-level entry point.
//!
//! Grounded on `chat/engine.py`'s `ChatEngine.handle_message`: persist
//! the user turn, assemble a system prompt from persona + memory
//! context, run a bounded tool loop (delegations sequential, regular
//! calls concurrent), handle the "no final text but tools ran"
//! streaming-summary fallback, strip `<think>` blocks from output, and
//! schedule fact extraction as a detached background task after
//! persisting the assistant turn.

use crate::conductor::agent_router::{AgentRouter, RouterDelegate, DELEGATE_TOOL_NAME};
use crate::conductor::channel::Channel;
use crate::conductor::client_wrapper::{ClientWrapper, Message, Role, ToolDefinition};
use crate::conductor::config::Config;
use crate::conductor::memory::{extract_facts, build_memory_context, ConversationStore, FactStore, HistoryMessage};
use crate::conductor::planner::{AllowAllPolicy, AllowlistPolicy, LoopContext, LoopObserver, PolicyEngine, run_bounded_loop};
use crate::conductor::skill::SkillRegistry;
use chrono::Utc;
use regex::Regex;
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref THINK_OPEN: Regex = Regex::new(r"(?is)<think>.*?</think>").unwrap();
    static ref UNCLOSED_OPEN: Regex = Regex::new(r"(?is)<think>.*$").unwrap();
    static ref UNPAIRED_CLOSE: Regex = Regex::new(r"(?is)^.*?</think>").unwrap();
    static ref IMAGE_MARKDOWN: Regex = Regex::new(r"!\[([^\]]*)\]\((/generated/[^)]+)\)").unwrap();
    static ref LATIN_ALNUM: Regex = Regex::new(r"[A-Za-zÀ-ſ0-9]").unwrap();
}

/// Fixed string returned when the LLM produced no text at all, even
/// after the streaming-summary fallback.
pub const NO_ANSWER_FALLBACK: &str = "I wasn't able to come up with a response.";

/// Strip `<think>...</think>` reasoning blocks from LLM output. Open
/// question (a): this heuristic may drop legitimate non-Latin content;
/// it reproduces the original verbatim and is gated by
/// [`Config::strip_think_blocks`].
///
/// Handles three cases: balanced blocks (removed outright), an
/// unclosed opening tag (everything from the tag onward is dropped),
/// and an unpaired closing tag with no matching opener (everything up
/// to and including the closer is dropped). After tag removal, any
/// trailing line with no Latin/German letters, digits is dropped too
/// (a CJK/filler heuristic from the original).
pub fn strip_think_blocks(text: &str) -> String {
    let mut result = THINK_OPEN.replace_all(text, "").into_owned();
    if result.to_lowercase().contains("<think>") {
        result = UNCLOSED_OPEN.replace(&result, "").into_owned();
    }
    if result.to_lowercase().contains("</think>") {
        result = UNPAIRED_CLOSE.replace(&result, "").into_owned();
    }

    let lines: Vec<&str> = result.lines().collect();
    let mut end = lines.len();
    while end > 0 && !LATIN_ALNUM.is_match(lines[end - 1]) && !lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    lines[..end].join("\n").trim().to_string()
}

/// Extract the first generated-image markdown sentinel from `text`,
/// returning `(alt, src)` and the text with the sentinel replaced by a
/// plain placeholder, matching the agent router's image-extraction
/// behavior applied to tool results.
pub fn extract_image_markdown(text: &str) -> (Option<(String, String)>, String) {
    if let Some(caps) = IMAGE_MARKDOWN.captures(text) {
        let alt = caps[1].to_string();
        let src = caps[2].to_string();
        let replaced = IMAGE_MARKDOWN.replace(text, "[image generated]").into_owned();
        (Some((alt, src)), replaced)
    } else {
        (None, text.to_string())
    }
}

struct ChannelObserver<'a> {
    channel: &'a dyn Channel,
}

#[async_trait::async_trait]
impl<'a> LoopObserver for ChannelObserver<'a> {
    async fn on_tool_start(&self, call: &crate::conductor::client_wrapper::NativeToolCall) {
        self.channel.send_tool_call(&call.name, &call.arguments).await;
    }

    async fn on_tool_end(&self, result: &crate::conductor::planner::ToolResult) {
        let (image, _) = extract_image_markdown(&result.result);
        if let Some((alt, src)) = image {
            self.channel.send_image(&src, &alt).await;
        }
    }
}

/// The top-level conversation orchestrator.
pub struct ChatOrchestrator {
    client: Arc<dyn ClientWrapper>,
    skills: Arc<SkillRegistry>,
    agent_router: Arc<AgentRouter>,
    conversation_store: Arc<dyn ConversationStore>,
    fact_store: Arc<dyn FactStore>,
    system_prompt: String,
    config: Config,
}

impl ChatOrchestrator {
    /// Assemble an orchestrator from its collaborators.
    pub fn new(
        client: Arc<dyn ClientWrapper>,
        skills: Arc<SkillRegistry>,
        agent_router: Arc<AgentRouter>,
        conversation_store: Arc<dyn ConversationStore>,
        fact_store: Arc<dyn FactStore>,
        system_prompt: impl Into<String>,
        config: Config,
    ) -> Self {
        ChatOrchestrator {
            client,
            skills,
            agent_router,
            conversation_store,
            fact_store,
            system_prompt: system_prompt.into(),
            config,
        }
    }

    /// Handle one conversational turn end to end, per §4.1. Returns
    /// the final assistant text.
    #[allow(clippy::too_many_arguments)]
    pub async fn handle(
        &self,
        channel: &dyn Channel,
        session_id: &str,
        user_text: &str,
        image: Option<&str>,
        tts_enabled: bool,
        allowed_skills: Option<&[String]>,
        agent_override: Option<&str>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        if user_text.is_empty() && image.is_none() {
            return Err("user_text must be non-empty unless an image is attached".into());
        }

        let display_text = match image {
            Some(_) if user_text.is_empty() => "[image attached]".to_string(),
            Some(_) => format!("[image attached] {}", user_text),
            None => user_text.to_string(),
        };

        self.conversation_store
            .save_message(HistoryMessage {
                session_id: session_id.to_string(),
                role: "user".to_string(),
                content: display_text,
                tool_call_id: None,
                image_blob: image.map(|b| b.to_string()),
                timestamp: Utc::now(),
            })
            .await?;

        let history = self
            .conversation_store
            .get_history(session_id, self.config.history_window)
            .await?;
        let memory_context = build_memory_context(self.fact_store.as_ref(), self.config.memory_context_limit).await?;

        let mut system_content = self.system_prompt.clone();
        if !memory_context.is_empty() {
            system_content.push_str("\n\n");
            system_content.push_str(&memory_context);
        }

        let mut messages = vec![Message::new(Role::System, system_content)];
        for h in &history {
            let role = match h.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                "system" => Role::System,
                "tool" => Role::Tool {
                    call_id: h.tool_call_id.clone().unwrap_or_default(),
                },
                other => return Err(format!("unknown history role '{}'", other).into()),
            };
            messages.push(Message::new(role, h.content.clone()));
        }

        if let Some(blob) = image {
            if let Some(last) = messages.last_mut() {
                *last = Message::with_image(Role::User, user_text, blob);
            }
        }

        let final_text = if let Some(agent_name) = agent_override {
            let result = self.agent_router.run_agent(agent_name, user_text, Some(&messages)).await?;
            for tool_name in &result.events {
                channel
                    .send_tool_call(&format!("agent:{}", tool_name), &serde_json::json!({}))
                    .await;
            }
            strip_think_blocks_if_enabled(&self.config, &result.text)
        } else {
            self.run_normal_turn(channel, &mut messages, allowed_skills).await?
        };

        channel.send_message(&final_text).await;

        self.conversation_store
            .save_message(HistoryMessage {
                session_id: session_id.to_string(),
                role: "assistant".to_string(),
                content: final_text.clone(),
                tool_call_id: None,
                image_blob: None,
                timestamp: Utc::now(),
            })
            .await?;

        self.spawn_background_tasks(user_text.to_string(), final_text.clone(), tts_enabled, channel);

        Ok(final_text)
    }

    async fn run_normal_turn(
        &self,
        channel: &dyn Channel,
        messages: &mut Vec<Message>,
        allowed_skills: Option<&[String]>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let mut tool_definitions: Vec<ToolDefinition> =
            self.skills.tool_definitions(allowed_skills);
        let mut delegation_tool_names = Vec::new();
        if let Some(delegate_tool) = self.agent_router.get_delegate_tool_definition(allowed_skills).await {
            delegation_tool_names.push(DELEGATE_TOOL_NAME.to_string());
            tool_definitions.push(delegate_tool);
        }

        let policy: Box<dyn PolicyEngine> = match allowed_skills {
            Some(allowed) => {
                let mut names = allowed.to_vec();
                names.push(DELEGATE_TOOL_NAME.to_string());
                Box::new(AllowlistPolicy::new(names))
            }
            None => Box::new(AllowAllPolicy),
        };

        let observer = ChannelObserver { channel };
        let delegate = RouterDelegate {
            router: &self.agent_router,
            conversation_context: Some(messages),
        };

        let outcome = run_bounded_loop(
            messages,
            LoopContext {
                client: self.client.as_ref(),
                skills: &self.skills,
                tool_definitions,
                delegation_tool_names,
                policy: policy.as_ref(),
                observer: &observer,
                max_rounds: self.config.max_rounds,
            },
            Some(&delegate),
        )
        .await?;

        let text = outcome.final_message.content.to_string();
        if !text.trim().is_empty() {
            return Ok(strip_think_blocks_if_enabled(&self.config, &text));
        }

        if !outcome.tool_calls.is_empty() {
            messages.push(Message::new(
                Role::User,
                "Summarize the results above for the user in a helpful final answer.",
            ));
            if let Some(mut stream) = self.client.chat_stream(messages).await? {
                use futures_util::StreamExt;
                let mut buffer = String::new();
                let mut thinking_closed = false;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    buffer.push_str(&chunk.content);
                    if !thinking_closed {
                        if let Some(pos) = buffer.to_lowercase().find("</think>") {
                            buffer = buffer[pos + "</think>".len()..].to_string();
                            thinking_closed = true;
                        } else {
                            continue;
                        }
                    }
                    if !chunk.content.is_empty() {
                        channel.send_stream_token(&chunk.content).await;
                    }
                }
                channel.send_stream_end().await;
                return Ok(strip_think_blocks_if_enabled(&self.config, &buffer));
            }
            let fallback = self.client.chat(messages, None).await?;
            let fallback_text = fallback.content.to_string();
            if !fallback_text.trim().is_empty() {
                return Ok(strip_think_blocks_if_enabled(&self.config, &fallback_text));
            }
        }

        Ok(NO_ANSWER_FALLBACK.to_string())
    }

    fn spawn_background_tasks(
        &self,
        user_text: String,
        assistant_text: String,
        tts_enabled: bool,
        _channel: &dyn Channel,
    ) {
        let client = self.client.clone();
        let fact_store = self.fact_store.clone();
        let prompt_template = self.config.fact_extraction_prompt.clone();
        tokio::spawn(async move {
            extract_facts(client.as_ref(), fact_store.as_ref(), &prompt_template, &user_text, &assistant_text).await;
        });

        if tts_enabled {
            log::debug!("tts requested but no TTS backend is configured");
        }
    }
}

fn strip_think_blocks_if_enabled(config: &Config, text: &str) -> String {
    if config.strip_think_blocks {
        strip_think_blocks(text)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::agent_template::TemplateLoader;
    use crate::conductor::channel::CollectorChannel;
    use crate::conductor::client_wrapper::EchoClient;
    use crate::conductor::memory::{InMemoryConversationStore, InMemoryFactStore};
    use tempfile::tempdir;

    fn test_orchestrator(client: Arc<dyn ClientWrapper>) -> (ChatOrchestrator, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("_builtin")).unwrap();
        std::fs::write(
            dir.path().join("_builtin/general.yaml"),
            "name: general\ndescription: top level\nmodel: gpt-4\n",
        )
        .unwrap();
        let skills = Arc::new(SkillRegistry::new());
        let router = futures_util::executor::block_on(AgentRouter::new(
            client.clone(),
            skills.clone(),
            TemplateLoader::new(dir.path()),
        ))
        .unwrap();
        let orchestrator = ChatOrchestrator::new(
            client,
            skills,
            Arc::new(router),
            Arc::new(InMemoryConversationStore::new()),
            Arc::new(InMemoryFactStore::new()),
            "You are a helpful assistant.",
            Config::default(),
        );
        (orchestrator, dir)
    }

    #[test]
    fn strip_think_removes_balanced_block() {
        assert_eq!(
            strip_think_blocks("<think>reasoning</think>Hallo Marlon!"),
            "Hallo Marlon!"
        );
    }

    #[test]
    fn strip_think_handles_unclosed_opening_tag() {
        assert_eq!(strip_think_blocks("Before<think>never closes"), "Before");
    }

    #[test]
    fn strip_think_handles_unpaired_closing_tag() {
        assert_eq!(strip_think_blocks("stray reasoning</think>Answer"), "Answer");
    }

    #[test]
    fn extract_image_markdown_replaces_sentinel() {
        let (image, replaced) = extract_image_markdown("Here you go: ![a cat](/generated/cat.png)");
        let (alt, src) = image.unwrap();
        assert_eq!(alt, "a cat");
        assert_eq!(src, "/generated/cat.png");
        assert!(!replaced.contains("/generated"));
    }

    #[tokio::test]
    async fn handle_persists_turn_and_returns_text() {
        let (orchestrator, _dir) = test_orchestrator(Arc::new(EchoClient::new("Hi there!")));
        let channel = CollectorChannel::new();
        let reply = orchestrator
            .handle(&channel, "session-1", "hello", None, false, None, None)
            .await
            .unwrap();
        assert_eq!(reply, "Hi there!");
        let history = orchestrator
            .conversation_store
            .get_history("session-1", 20)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
    }

    #[tokio::test]
    async fn handle_with_image_persists_blob_and_marks_display_text() {
        let (orchestrator, _dir) = test_orchestrator(Arc::new(EchoClient::new("I see a cat.")));
        let channel = CollectorChannel::new();
        let reply = orchestrator
            .handle(&channel, "session-1", "what is this?", Some("base64data"), false, None, None)
            .await
            .unwrap();
        assert_eq!(reply, "I see a cat.");

        let history = orchestrator
            .conversation_store
            .get_history("session-1", 20)
            .await
            .unwrap();
        assert_eq!(history[0].role, "user");
        assert_eq!(history[0].content, "[image attached] what is this?");
        assert_eq!(history[0].image_blob.as_deref(), Some("base64data"));
    }

    #[tokio::test]
    async fn handle_strips_think_blocks_from_final_answer() {
        let (orchestrator, _dir) =
            test_orchestrator(Arc::new(EchoClient::new("<think>plan</think>Done.")));
        let channel = CollectorChannel::new();
        let reply = orchestrator
            .handle(&channel, "session-1", "hello", None, false, None, None)
            .await
            .unwrap();
        assert_eq!(reply, "Done.");
    }
}

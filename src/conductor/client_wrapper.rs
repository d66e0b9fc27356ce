//! Shared primitives for the LLM client boundary.
//!
//! The conversation orchestrator treats the concrete LLM provider as an
//! external collaborator with a thin contract: [`ClientWrapper`]. No
//! vendor wire format is implemented here — see `DESIGN.md` for why the
//! concrete provider clients were dropped. [`EchoClient`] is a minimal
//! in-memory test double used throughout this crate's tests.
//!
//! # Example
//!
//! ```rust
//! use conductor::{ClientWrapper, EchoClient, Message, Role};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = EchoClient::new("ok");
//! let resp = client
//!     .send_message(&[Message::new(Role::User, "hello")], None)
//!     .await?;
//! assert_eq!(resp.content.as_ref(), "ok");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single tool call returned by the LLM in a native function-calling
/// response. Providers assign an opaque [`id`](NativeToolCall::id) so the
/// tool result can be correlated back via [`Role::Tool`].
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call id, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat
/// request. Produced for a given skill by
/// [`crate::conductor::skill::Skill::to_tool_definition`].
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name as it appears in the `tools` array.
    pub name: String,
    /// Human-readable description surfaced to the LLM.
    pub description: String,
    /// JSON-Schema object describing accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// Represents the possible roles for a message.
#[derive(Debug, Clone)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behavior.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message (model responses).
    Assistant,
    /// A tool-result message correlating with a prior assistant
    /// [`NativeToolCall`] by id.
    Tool {
        /// The id of the [`NativeToolCall`] this result answers.
        call_id: String,
    },
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug)]
pub struct TokenUsage {
    /// Prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// A generic message exchanged with an LLM.
#[derive(Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body.
    pub content: Arc<str>,
    /// Native tool calls requested by the assistant. Non-empty only on
    /// assistant messages returned by [`ClientWrapper::send_message`]
    /// when the provider responds with function-calling results.
    pub tool_calls: Vec<NativeToolCall>,
    /// A base64-encoded image attached to a user turn. Set only on the
    /// structured form a [`Role::User`] message is rewritten into when
    /// `handle` receives an `image` argument (§4.1 step 4).
    pub image_blob: Option<Arc<str>>,
}

impl Message {
    /// Build a plain message with no tool calls attached.
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            image_blob: None,
        }
    }

    /// Build a tool-result message addressed to `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<Arc<str>>) -> Self {
        Message {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: content.into(),
            tool_calls: Vec::new(),
            image_blob: None,
        }
    }

    /// Build a user message carrying an attached image alongside its text.
    pub fn with_image(role: Role, content: impl Into<Arc<str>>, image_blob: impl Into<Arc<str>>) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            image_blob: Some(image_blob.into()),
        }
    }
}

/// A chunk of content in a streaming response: an incremental delta.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// Incremental content delta. May be empty for chunks carrying only
    /// a `finish_reason`.
    pub content: String,
    /// Optional finish reason mirroring the provider's completion status.
    pub finish_reason: Option<String>,
}

/// A stream of message chunks compatible with `Send` executors.
pub type MessageChunkStream =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, Box<dyn Error + Send + Sync>>> + Send>>;

/// Trait defining the interface to an LLM provider. The concrete wire
/// format is out of scope for this crate; implementors translate these
/// calls into a provider-specific request.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Full request/response chat completion. `tools`, when `Some` and
    /// non-empty, is forwarded to the provider's function-calling API.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Alias kept for call-site symmetry with [`ClientWrapper::chat`];
    /// identical contract, named to match the external LLM API surface
    /// in the spec (`chat(messages, tools?, options?)`).
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        self.chat(messages, tools).await
    }

    /// Request a streaming response. Implementors without streaming
    /// support may inherit the default, which yields `Ok(None)`.
    async fn chat_stream(
        &self,
        _messages: &[Message],
    ) -> Result<Option<MessageChunkStream>, Box<dyn Error + Send + Sync>> {
        Ok(None)
    }

    /// Single-shot completion over a raw prompt, with no conversation
    /// bookkeeping. Used by the fact extractor (§4.9).
    async fn generate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Produce an embedding vector for `text`. Out of scope for the
    /// orchestrator itself but part of the declared LLM API surface
    /// (§6); default implementation errors so callers that don't need
    /// embeddings aren't forced to implement it meaningfully.
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, Box<dyn Error + Send + Sync>> {
        Err("embed is not supported by this client".into())
    }

    /// Identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;

    /// Token usage from the most recent [`ClientWrapper::chat`] call.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared mutable slot where an implementation can persist usage.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}

/// A minimal in-memory [`ClientWrapper`] that returns a fixed response
/// (optionally echoing the last user message) without any network
/// access. Used by this crate's own tests and as a starting point for
/// integrators wiring up the orchestrator before a real provider exists.
pub struct EchoClient {
    model: String,
    fixed_response: Option<Arc<str>>,
}

impl EchoClient {
    /// Always reply with `response`, ignoring the input messages.
    pub fn new(response: impl Into<Arc<str>>) -> Self {
        EchoClient {
            model: "echo".to_string(),
            fixed_response: Some(response.into()),
        }
    }

    /// Echo back the content of the last message in the request.
    pub fn echoing() -> Self {
        EchoClient {
            model: "echo".to_string(),
            fixed_response: None,
        }
    }
}

#[async_trait]
impl ClientWrapper for EchoClient {
    async fn chat(
        &self,
        messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let content = match &self.fixed_response {
            Some(fixed) => fixed.clone(),
            None => messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_else(|| Arc::from("")),
        };
        Ok(Message::new(Role::Assistant, content))
    }

    async fn generate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.fixed_response {
            Some(fixed) => Ok(fixed.to_string()),
            None => Ok(prompt.to_string()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

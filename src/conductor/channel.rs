//! Channel adapters: the orchestrator's only way to talk back to a client.
//!
//! Grounded on `chat/adapters.py`'s `ChannelAdapter` ABC and its
//! `WebSocketAdapter` implementation for the frame-sending contract,
//! and `notifications/notification_service.py`'s `CollectorAdapter`
//! for the in-process, server-initiated-turn variant. The chat-bridge
//! variant's long-message splitting (newline then space, never
//! mid-word) is grounded on the same adapters module's chunking logic
//! as applied to Discord delivery in `notification_service.py`.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

/// Everything the orchestrator needs to talk back to a client during a
/// turn. Implementations translate these calls into whatever wire
/// format (WebSocket frame, chat-bridge message, in-process capture)
/// their transport uses.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Announce a tool call before it executes.
    async fn send_tool_call(&self, tool: &str, args: &serde_json::Value);

    /// Send an image reference (e.g. a generated-image markdown sentinel).
    async fn send_image(&self, src: &str, alt: &str);

    /// Send one streamed token of the final answer.
    async fn send_stream_token(&self, token: &str);

    /// Signal the end of a streamed final answer. Exactly one call per
    /// turn that produced any `send_stream_token` calls.
    async fn send_stream_end(&self);

    /// Send a complete, non-streamed message.
    async fn send_message(&self, content: &str);

    /// Send a user-visible error string.
    async fn send_error(&self, content: &str);

    /// Send an audio reference (TTS output).
    async fn send_audio(&self, src: &str);
}

/// Structured JSON-frame adapter, one frame type per [`Channel`] method.
/// The actual socket write is delegated to a `Fn(serde_json::Value)`
/// sink so this module stays transport-library-agnostic.
pub struct WebSocketChannel<F>
where
    F: Fn(serde_json::Value) + Send + Sync,
{
    sink: F,
}

impl<F> WebSocketChannel<F>
where
    F: Fn(serde_json::Value) + Send + Sync,
{
    /// Wrap a frame-sending closure as a [`Channel`].
    pub fn new(sink: F) -> Self {
        WebSocketChannel { sink }
    }

    fn send(&self, frame: serde_json::Value) {
        (self.sink)(frame);
    }
}

#[async_trait]
impl<F> Channel for WebSocketChannel<F>
where
    F: Fn(serde_json::Value) + Send + Sync,
{
    async fn send_tool_call(&self, tool: &str, args: &serde_json::Value) {
        self.send(serde_json::json!({ "type": "tool_call", "tool": tool, "args": args }));
    }

    async fn send_image(&self, src: &str, alt: &str) {
        self.send(serde_json::json!({ "type": "image", "src": src, "alt": alt }));
    }

    async fn send_stream_token(&self, token: &str) {
        self.send(serde_json::json!({ "type": "stream", "token": token }));
    }

    async fn send_stream_end(&self) {
        self.send(serde_json::json!({ "type": "stream_end" }));
    }

    async fn send_message(&self, content: &str) {
        self.send(serde_json::json!({ "type": "message", "content": content }));
    }

    async fn send_error(&self, content: &str) {
        self.send(serde_json::json!({ "type": "error", "content": content }));
    }

    async fn send_audio(&self, src: &str) {
        self.send(serde_json::json!({ "type": "audio", "src": src }));
    }
}

/// Buffers stream tokens into chunked messages and splits long outbound
/// messages on a newline, falling back to a space, never mid-word.
/// Matches a chat-bridge style transport (e.g. a bot platform) with a
/// hard per-message character cap.
pub struct ChatBridgeChannel<F>
where
    F: Fn(String) + Send + Sync,
{
    send_fn: F,
    char_limit: usize,
    stream_buffer: Mutex<String>,
}

impl<F> ChatBridgeChannel<F>
where
    F: Fn(String) + Send + Sync,
{
    /// Wrap a plain-text send closure with the given per-message
    /// character cap.
    pub fn new(send_fn: F, char_limit: usize) -> Self {
        ChatBridgeChannel {
            send_fn,
            char_limit,
            stream_buffer: Mutex::new(String::new()),
        }
    }

    /// Split `text` into chunks no longer than `limit`, cutting at the
    /// last newline within the chunk when one exists, else the last
    /// space, else at the limit as a last resort.
    pub fn split_message(text: &str, limit: usize) -> Vec<String> {
        if text.len() <= limit || limit == 0 {
            return vec![text.to_string()];
        }
        let mut chunks = Vec::new();
        let mut remaining = text;
        while remaining.len() > limit {
            let window = &remaining[..limit];
            let cut = window
                .rfind('\n')
                .or_else(|| window.rfind(' '))
                .unwrap_or(limit);
            let cut = if cut == 0 { limit } else { cut };
            chunks.push(remaining[..cut].to_string());
            remaining = remaining[cut..].trim_start();
        }
        if !remaining.is_empty() {
            chunks.push(remaining.to_string());
        }
        chunks
    }
}

#[async_trait]
impl<F> Channel for ChatBridgeChannel<F>
where
    F: Fn(String) + Send + Sync,
{
    async fn send_tool_call(&self, tool: &str, args: &serde_json::Value) {
        (self.send_fn)(format!("`[tool] {}({})`", tool, args));
    }

    async fn send_image(&self, src: &str, alt: &str) {
        (self.send_fn)(format!("![{}]({})", alt, src));
    }

    async fn send_stream_token(&self, token: &str) {
        self.stream_buffer.lock().await.push_str(token);
    }

    async fn send_stream_end(&self) {
        let mut buffer = self.stream_buffer.lock().await;
        if !buffer.is_empty() {
            for chunk in Self::split_message(&buffer, self.char_limit) {
                (self.send_fn)(chunk);
            }
            buffer.clear();
        }
    }

    async fn send_message(&self, content: &str) {
        for chunk in Self::split_message(content, self.char_limit) {
            (self.send_fn)(chunk);
        }
    }

    async fn send_error(&self, content: &str) {
        (self.send_fn)(format!("Error: {}", content));
    }

    async fn send_audio(&self, src: &str) {
        (self.send_fn)(format!("[audio] {}", src));
    }
}

/// A single captured call, for inspecting what a [`CollectorChannel`]
/// received during a server-initiated turn.
#[derive(Debug, Clone)]
pub enum CapturedEvent {
    /// A tool was invoked.
    ToolCall { tool: String, args: serde_json::Value },
    /// An image was sent.
    Image { src: String, alt: String },
    /// A complete message was sent.
    Message(String),
    /// An error was sent.
    Error(String),
    /// Audio was sent.
    Audio(String),
}

/// No-op adapter that just records what was sent to it. Used for
/// automation-triggered orchestrator invocations (synthetic sessions)
/// where there is no real client on the other end, matching the
/// original's `CollectorAdapter`.
#[derive(Default)]
pub struct CollectorChannel {
    events: Mutex<Vec<CapturedEvent>>,
    stream_buffer: Mutex<String>,
    stream_ended: Mutex<bool>,
}

impl CollectorChannel {
    /// An empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent to this collector so far, in call order.
    pub async fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().await.clone()
    }

    /// Concatenation of every [`Channel::send_message`] call plus the
    /// streamed buffer if [`Channel::send_stream_end`] was called.
    pub async fn collected_text(&self) -> String {
        let events = self.events.lock().await;
        events
            .iter()
            .filter_map(|e| match e {
                CapturedEvent::Message(text) => Some(text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Whether exactly one `send_stream_end` has been recorded since
    /// construction (a testable property from §8).
    pub async fn stream_ended_exactly_once(&self) -> bool {
        *self.stream_ended.lock().await
    }
}

#[async_trait]
impl Channel for CollectorChannel {
    async fn send_tool_call(&self, tool: &str, args: &serde_json::Value) {
        self.events.lock().await.push(CapturedEvent::ToolCall {
            tool: tool.to_string(),
            args: args.clone(),
        });
    }

    async fn send_image(&self, src: &str, alt: &str) {
        self.events.lock().await.push(CapturedEvent::Image {
            src: src.to_string(),
            alt: alt.to_string(),
        });
    }

    async fn send_stream_token(&self, token: &str) {
        self.stream_buffer.lock().await.push_str(token);
    }

    async fn send_stream_end(&self) {
        let mut buffer = self.stream_buffer.lock().await;
        if !buffer.is_empty() {
            self.events
                .lock()
                .await
                .push(CapturedEvent::Message(buffer.clone()));
            buffer.clear();
        }
        let mut ended = self.stream_ended.lock().await;
        *ended = true;
    }

    async fn send_message(&self, content: &str) {
        self.events
            .lock()
            .await
            .push(CapturedEvent::Message(content.to_string()));
    }

    async fn send_error(&self, content: &str) {
        self.events
            .lock()
            .await
            .push(CapturedEvent::Error(content.to_string()));
    }

    async fn send_audio(&self, src: &str) {
        self.events
            .lock()
            .await
            .push(CapturedEvent::Audio(src.to_string()));
    }
}

/// A notification emitted outside a normal turn (§4.10), carrying a
/// send timestamp for persistence.
#[derive(Debug, Clone)]
pub struct NotificationRecord {
    /// Message body.
    pub message: String,
    /// When it was sent.
    pub timestamp: chrono::DateTime<Utc>,
}

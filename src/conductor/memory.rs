//! Conversation history and long-term memory facts.
//!
//! Grounded on `memory/database.py` for the storage contract
//! (`save_message`/`get_history`, `remember`/`recall`/`search_memory`
//! with `(category, key)` upsert semantics), `memory/context_builder.py`
//! for the category-grouped system-prompt block, and
//! `memory/fact_extractor.py` for the background best-effort extraction
//! pass. Persistence internals are explicitly out of scope (§1
//! Non-goals); [`ConversationStore`] and [`FactStore`] are the declared
//! interfaces, with an in-memory implementation of each for tests.

use crate::conductor::client_wrapper::ClientWrapper;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One role-tagged turn in a conversation.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    /// Opaque session identifier.
    pub session_id: String,
    /// `"system" | "user" | "assistant" | "tool"`.
    pub role: String,
    /// Message body.
    pub content: String,
    /// Present on tool-result messages; correlates to the preceding
    /// assistant message's matching tool call.
    pub tool_call_id: Option<String>,
    /// Base64-encoded image attached to this turn, if any.
    pub image_blob: Option<String>,
    /// When the message was recorded.
    pub timestamp: DateTime<Utc>,
}

/// A single remembered fact. `(category, key)` is unique; writing an
/// existing pair updates `value` and `updated_at` in place.
#[derive(Debug, Clone)]
pub struct MemoryFact {
    /// Grouping label, e.g. `"personal"`, `"preferences"`.
    pub category: String,
    /// Short identifier within the category, e.g. `"favorite_language"`.
    pub key: String,
    /// The remembered value, capped at 200 characters by the extractor.
    pub value: String,
    /// When this fact was last written.
    pub updated_at: DateTime<Utc>,
}

/// Declared conversation-history persistence interface. Concrete
/// storage (SQLite, Postgres, etc.) is out of scope; this crate ships
/// [`InMemoryConversationStore`] for tests and small deployments.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message to `session_id`'s history.
    async fn save_message(
        &self,
        message: HistoryMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// The most recent `limit` messages for `session_id`, in
    /// chronological (oldest-first) order, matching the original's
    /// "select DESC limit N then reorder ASC" contract.
    async fn get_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, Box<dyn std::error::Error + Send + Sync>>;

    /// Drop all history for a session.
    async fn clear_history(&self, session_id: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Declared long-term fact storage interface.
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Upsert a fact under `(category, key)`.
    async fn remember(
        &self,
        category: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Fetch a single fact.
    async fn recall(
        &self,
        category: &str,
        key: &str,
    ) -> Result<Option<MemoryFact>, Box<dyn std::error::Error + Send + Sync>>;

    /// All facts in `category`.
    async fn recall_category(
        &self,
        category: &str,
    ) -> Result<Vec<MemoryFact>, Box<dyn std::error::Error + Send + Sync>>;

    /// Most recently updated facts across all categories.
    async fn recent_facts(
        &self,
        limit: usize,
    ) -> Result<Vec<MemoryFact>, Box<dyn std::error::Error + Send + Sync>>;

    /// Case-insensitive substring search over keys and values.
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryFact>, Box<dyn std::error::Error + Send + Sync>>;

    /// Remove a single fact. Returns whether it existed.
    async fn forget(
        &self,
        category: &str,
        key: &str,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// A simple `Vec`-backed [`ConversationStore`], sufficient for tests
/// and single-process deployments.
#[derive(Default)]
pub struct InMemoryConversationStore {
    messages: RwLock<Vec<HistoryMessage>>,
}

impl InMemoryConversationStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save_message(
        &self,
        message: HistoryMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn get_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>, Box<dyn std::error::Error + Send + Sync>> {
        let messages = self.messages.read().await;
        let mut matching: Vec<HistoryMessage> = messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        if matching.len() > limit {
            let drop = matching.len() - limit;
            matching.drain(0..drop);
        }
        Ok(matching)
    }

    async fn clear_history(&self, session_id: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.messages.write().await.retain(|m| m.session_id != session_id);
        Ok(())
    }
}

/// A `HashMap`-backed [`FactStore`], sufficient for tests and small
/// deployments.
#[derive(Default)]
pub struct InMemoryFactStore {
    facts: RwLock<HashMap<(String, String), MemoryFact>>,
}

impl InMemoryFactStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn remember(
        &self,
        category: &str,
        key: &str,
        value: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.facts.write().await.insert(
            (category.to_string(), key.to_string()),
            MemoryFact {
                category: category.to_string(),
                key: key.to_string(),
                value: value.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn recall(
        &self,
        category: &str,
        key: &str,
    ) -> Result<Option<MemoryFact>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .facts
            .read()
            .await
            .get(&(category.to_string(), key.to_string()))
            .cloned())
    }

    async fn recall_category(
        &self,
        category: &str,
    ) -> Result<Vec<MemoryFact>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .facts
            .read()
            .await
            .values()
            .filter(|f| f.category == category)
            .cloned()
            .collect())
    }

    async fn recent_facts(
        &self,
        limit: usize,
    ) -> Result<Vec<MemoryFact>, Box<dyn std::error::Error + Send + Sync>> {
        let mut facts: Vec<MemoryFact> = self.facts.read().await.values().cloned().collect();
        facts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        facts.truncate(limit);
        Ok(facts)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryFact>, Box<dyn std::error::Error + Send + Sync>> {
        let query = query.to_lowercase();
        let mut facts: Vec<MemoryFact> = self
            .facts
            .read()
            .await
            .values()
            .filter(|f| {
                f.key.to_lowercase().contains(&query) || f.value.to_lowercase().contains(&query)
            })
            .cloned()
            .collect();
        facts.truncate(limit);
        Ok(facts)
    }

    async fn forget(
        &self,
        category: &str,
        key: &str,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .facts
            .write()
            .await
            .remove(&(category.to_string(), key.to_string()))
            .is_some())
    }
}

/// Build the "what I remember about you" block folded into the system
/// prompt, grouping facts by category. Returns an empty string when
/// there are no facts, matching the original's behavior of omitting
/// the section entirely rather than emitting an empty header.
pub async fn build_memory_context(
    store: &dyn FactStore,
    limit: usize,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let facts = store.recent_facts(limit).await?;
    if facts.is_empty() {
        return Ok(String::new());
    }

    let mut by_category: Vec<(String, Vec<&MemoryFact>)> = Vec::new();
    for fact in &facts {
        match by_category.iter_mut().find(|(cat, _)| *cat == fact.category) {
            Some((_, items)) => items.push(fact),
            None => by_category.push((fact.category.clone(), vec![fact])),
        }
    }

    let mut block = String::from("What you remember about the user:\n");
    for (category, items) in by_category {
        block.push_str(&format!("- {}:\n", category));
        for fact in items {
            block.push_str(&format!("  - {}: {}\n", fact.key, fact.value));
        }
    }
    Ok(block)
}

const EXTRACTED_ARRAY_MIN_LEN: usize = 2; // "[]"

/// Run the fact-extraction prompt over a single user/assistant turn
/// and upsert the resulting facts. Best-effort: any failure (LLM
/// error, unparseable response) is swallowed and logged rather than
/// surfaced, matching the original's fire-and-forget extractor.
pub async fn extract_facts(
    client: &dyn ClientWrapper,
    store: &dyn FactStore,
    prompt_template: &str,
    user_message: &str,
    assistant_message: &str,
) {
    if user_message.trim().len() < 10 {
        return;
    }
    let conversation = format!("User: {}\nAssistant: {}", user_message, assistant_message);
    let prompt = prompt_template.replace("{conversation}", &conversation);

    let response = match client.generate(&prompt).await {
        Ok(text) => text,
        Err(err) => {
            log::warn!("fact extraction LLM call failed: {}", err);
            return;
        }
    };

    let stripped = crate::conductor::orchestrator::strip_think_blocks(&response);
    let Some(array) = extract_first_json_array(&stripped) else {
        log::debug!("fact extraction found no JSON array in response");
        return;
    };
    if array.len() < EXTRACTED_ARRAY_MIN_LEN {
        return;
    }

    let facts: Vec<Value> = match serde_json::from_str(&array) {
        Ok(Value::Array(items)) => items,
        _ => {
            log::debug!("fact extraction JSON array failed to parse");
            return;
        }
    };

    for fact in facts {
        let (category, key, value) = match (
            fact.get("category").and_then(|v| v.as_str()),
            fact.get("key").and_then(|v| v.as_str()),
            fact.get("value").and_then(|v| v.as_str()),
        ) {
            (Some(c), Some(k), Some(v)) => (c, k, v),
            _ => continue,
        };
        let truncated: String = value.chars().take(200).collect();
        if let Err(err) = store.remember(category, key, &truncated).await {
            log::warn!("failed to persist extracted fact: {}", err);
        }
    }
}

fn extract_first_json_array(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

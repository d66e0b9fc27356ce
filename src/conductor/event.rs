//! Event bus: bounded-history pub/sub used to decouple the scheduler,
//! webhook ingress, and automation engine from one another.
//!
//! Grounded on the original system's `automation/event_bus.py`: a
//! type-keyed subscriber map, a list of global subscribers, and a
//! bounded ring of recent events for introspection. Handlers run as
//! detached tasks; a handler that errors is logged and never propagates
//! back to the emitter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const MAX_HISTORY: usize = 100;

/// Something that happened: a scheduler tick, a webhook delivery, a
/// tool invocation, etc. `source` identifies the emitter, e.g.
/// `"scheduler:daily_report"` or `"webhook:github"`.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event type, used for subscription matching (e.g. `"webhook_received"`).
    pub event_type: String,
    /// Identifies what emitted the event.
    pub source: String,
    /// Arbitrary structured payload.
    pub data: Value,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Construct an event with `data` defaulting to an empty JSON object
    /// if `Value::Null` is passed, matching the Python default of `{}`.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Event {
            event_type: event_type.into(),
            source: source.into(),
            data: if data.is_null() {
                Value::Object(Default::default())
            } else {
                data
            },
            timestamp: Utc::now(),
        }
    }

    /// Read a dotted path into `data`, e.g. `"repository.name"`.
    /// Returns `None` if any segment is missing.
    pub fn data_path(&self, path: &str) -> Option<&Value> {
        let mut current = &self.data;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

/// Something that reacts to events published on an [`EventBus`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Invoked once per matching event. Errors are logged by the bus
    /// and never propagated to the emitter or other handlers.
    async fn handle(&self, event: &Event) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(&Event) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self(event)
    }
}

/// In-process publish/subscribe hub with a bounded event history.
///
/// Handlers are invoked concurrently as detached tasks in no
/// guaranteed delivery order; emission order into the history is
/// preserved.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>>,
    global_subscribers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
    history: Arc<RwLock<Vec<Event>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        EventBus {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            global_subscribers: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register `handler` for events whose `event_type` equals `event_type`.
    pub async fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.subscribers
            .write()
            .await
            .entry(event_type.into())
            .or_insert_with(Vec::new)
            .push(handler);
    }

    /// Register `handler` for every event regardless of type. Used by
    /// the automation engine to evaluate its rule set on each emission.
    pub async fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        self.global_subscribers.write().await.push(handler);
    }

    /// Append `event` to history (evicting the oldest entry past
    /// [`MAX_HISTORY`]) and dispatch it to matching and global handlers
    /// as detached, independently-failing tasks.
    pub async fn emit(&self, event: Event) {
        {
            let mut history = self.history.write().await;
            history.push(event.clone());
            if history.len() > MAX_HISTORY {
                let overflow = history.len() - MAX_HISTORY;
                history.drain(0..overflow);
            }
        }

        let mut handlers: Vec<Arc<dyn EventHandler>> =
            self.global_subscribers.read().await.clone();
        if let Some(typed) = self.subscribers.read().await.get(&event.event_type) {
            handlers.extend(typed.iter().cloned());
        }

        for handler in handlers {
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(err) = handler.handle(&event).await {
                    log::error!("event handler failed for '{}': {}", event.event_type, err);
                }
            });
        }
    }

    /// Most recent `limit` events, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }
}

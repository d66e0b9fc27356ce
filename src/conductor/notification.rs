//! Multi-channel notification fan-out.
//!
//! Grounded on `notifications/notification_service.py`: a list of live
//! subscriber channels plus an optional chat-bridge binding, dead
//! subscribers dropped silently on send, and a `send_as_clara` variant
//! that invokes the orchestrator on a synthetic session and then
//! broadcasts the reply as a notification.

use crate::conductor::channel::{Channel, CollectorChannel, NotificationRecord};
use crate::conductor::orchestrator::ChatOrchestrator;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Session id reserved for automation-triggered orchestrator turns that
/// have no real client attached.
pub const AUTOMATION_SESSION_ID: &str = "automation-internal";

/// Persists a [`NotificationRecord`]. Concrete storage is out of scope;
/// this trait exists so `notify` has somewhere to record history
/// without this crate owning a database.
#[async_trait::async_trait]
pub trait NotificationLog: Send + Sync {
    /// Append a sent notification to the log.
    async fn record(&self, record: NotificationRecord);
}

/// A log that discards everything, for deployments with no
/// notification history requirement.
pub struct NullNotificationLog;

#[async_trait::async_trait]
impl NotificationLog for NullNotificationLog {
    async fn record(&self, _record: NotificationRecord) {}
}

/// Default channel kinds addressed by [`NotificationService::notify`]
/// when the caller passes no explicit `channels` list, matching the
/// original's `notify(message, channels=["web", "discord"])` default.
const DEFAULT_CHANNELS: &[&str] = &["web", "discord"];

/// Fans a message out to every subscriber registered under a matching
/// channel kind (e.g. `"web"`, `"discord"`). Dead subscribers (those
/// whose send fails) are dropped rather than causing the whole
/// broadcast to fail.
pub struct NotificationService {
    subscribers: RwLock<Vec<(String, Arc<dyn Channel>)>>,
    log: Arc<dyn NotificationLog>,
}

impl NotificationService {
    /// A notification service with no subscribers yet and no persisted
    /// log.
    pub fn new() -> Self {
        NotificationService {
            subscribers: RwLock::new(Vec::new()),
            log: Arc::new(NullNotificationLog),
        }
    }

    /// A notification service that records every sent message via `log`.
    pub fn with_log(log: Arc<dyn NotificationLog>) -> Self {
        NotificationService {
            subscribers: RwLock::new(Vec::new()),
            log,
        }
    }

    /// Register a channel under the default `"web"` kind.
    pub async fn subscribe(&self, channel: Arc<dyn Channel>) {
        self.subscribe_as("web", channel).await;
    }

    /// Register a channel under an explicit kind (e.g. `"discord"`), so
    /// [`NotificationService::notify`] can target it by name.
    pub async fn subscribe_as(&self, kind: impl Into<String>, channel: Arc<dyn Channel>) {
        self.subscribers.write().await.push((kind.into(), channel));
    }

    /// Drop all registered subscribers (e.g. on client disconnect).
    pub async fn unsubscribe_all(&self) {
        self.subscribers.write().await.clear();
    }

    /// Send `message` to every subscriber whose registered kind is in
    /// `channels`. An empty `channels` falls back to the default
    /// `["web", "discord"]` set.
    pub async fn notify(&self, message: &str, channels: &[String]) {
        let targets: Vec<&str> = if channels.is_empty() {
            DEFAULT_CHANNELS.to_vec()
        } else {
            channels.iter().map(|c| c.as_str()).collect()
        };
        let subscribers = self.subscribers.read().await;
        for (kind, subscriber) in subscribers.iter() {
            if targets.iter().any(|t| t == kind) {
                subscriber.send_message(message).await;
            }
        }
        self.log
            .record(NotificationRecord {
                message: message.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    /// Invoke the orchestrator on the reserved synthetic session with
    /// `user_message` as the user turn, then broadcast the reply as a
    /// notification across the default channel set. Used by the
    /// automation engine's `send_message` action (§4.7).
    pub async fn send_as_clara(
        &self,
        orchestrator: &ChatOrchestrator,
        user_message: &str,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let collector = CollectorChannel::new();
        let reply = orchestrator
            .handle(&collector, AUTOMATION_SESSION_ID, user_message, None, false, None, None)
            .await?;
        self.notify(&reply, &[]).await;
        Ok(reply)
    }
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

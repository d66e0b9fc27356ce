//! Event-triggered automation rules.
//!
//! Grounded on `automation/automation_engine.py`: rules subscribe to
//! all bus events, skip on disabled/type-mismatch/filter-mismatch,
//! match `source` and dotted `data.<path>` filter keys, and dispatch to
//! one of four action kinds with `{{event.*}}` substitution applied to
//! string config values.

use crate::conductor::event::{Event, EventBus, EventHandler};
use crate::conductor::notification::NotificationService;
use crate::conductor::orchestrator::ChatOrchestrator;
use crate::conductor::script::ScriptEngine;
use crate::conductor::skill::SkillRegistry;
use crate::conductor::template_text::substitute_event;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What an [`AutomationRule`] does once its event filter matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionType {
    /// Invoke a named skill with templated arguments.
    RunSkill,
    /// Invoke a named script with templated variables.
    RunScript,
    /// Broadcast a templated message via the notification service.
    SendNotification,
    /// Invoke the orchestrator with a templated user message on the
    /// reserved automation session, then broadcast its reply.
    SendMessage,
}

/// A single automation rule.
#[derive(Debug, Clone)]
pub struct AutomationRule {
    /// Unique name.
    pub name: String,
    /// Whether the rule is currently active.
    pub enabled: bool,
    /// Only events with this `event_type` are considered.
    pub event_type: String,
    /// `source` compares `event.source`; `data.<path>` walks the
    /// event's data object. A missing `data.<path>` target never matches.
    pub event_filter: HashMap<String, String>,
    /// What to do when the filter matches.
    pub action_type: ActionType,
    /// Action-specific configuration; string values get
    /// `{{event.*}}` substitution before use.
    pub action_config: HashMap<String, String>,
}

/// Declared persistence interface for the rule set. [`InMemoryRuleStore`]
/// is provided for tests.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Persist a new rule. Caller has already checked for name collisions.
    async fn insert(&self, rule: AutomationRule) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// All persisted rules.
    async fn all(&self) -> Result<Vec<AutomationRule>, Box<dyn std::error::Error + Send + Sync>>;
    /// Remove a rule by name. Returns whether it existed.
    async fn remove(&self, name: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
    /// Enable or disable a rule by name. Returns whether it existed.
    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// `Vec`-backed [`RuleStore`].
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<Vec<AutomationRule>>,
}

impl InMemoryRuleStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn insert(&self, rule: AutomationRule) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.rules.write().await.push(rule);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<AutomationRule>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.rules.read().await.clone())
    }

    async fn remove(&self, name: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let mut rules = self.rules.write().await;
        let before = rules.len();
        rules.retain(|r| r.name != name);
        Ok(rules.len() != before)
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Evaluates every rule against every event on the bus and dispatches
/// matching actions.
pub struct AutomationEngine {
    store: Arc<dyn RuleStore>,
    skills: Arc<SkillRegistry>,
    scripts: Arc<ScriptEngine>,
    notifications: Arc<NotificationService>,
    orchestrator: Arc<ChatOrchestrator>,
}

impl AutomationEngine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        store: Arc<dyn RuleStore>,
        skills: Arc<SkillRegistry>,
        scripts: Arc<ScriptEngine>,
        notifications: Arc<NotificationService>,
        orchestrator: Arc<ChatOrchestrator>,
    ) -> Self {
        AutomationEngine {
            store,
            skills,
            scripts,
            notifications,
            orchestrator,
        }
    }

    /// Register `self` as a global subscriber on `event_bus`. Call once
    /// at startup after constructing the engine.
    pub async fn attach(self: &Arc<Self>, event_bus: &EventBus) {
        event_bus.subscribe_all(self.clone()).await;
    }

    /// Add a rule, rejecting duplicate names.
    pub async fn add_rule(&self, rule: AutomationRule) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.store.all().await?.iter().any(|r| r.name == rule.name) {
            return Err(format!("a rule named '{}' already exists", rule.name).into());
        }
        self.store.insert(rule).await
    }

    /// Remove a rule by name.
    pub async fn remove_rule(&self, name: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        self.store.remove(name).await
    }

    /// Enable or disable a rule by name.
    pub async fn toggle_rule(&self, name: &str, enabled: bool) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        self.store.set_enabled(name, enabled).await
    }

    /// Every persisted rule.
    pub async fn list_rules(&self) -> Result<Vec<AutomationRule>, Box<dyn std::error::Error + Send + Sync>> {
        self.store.all().await
    }

    fn matches_filter(event: &Event, filter: &HashMap<String, String>) -> bool {
        for (key, expected) in filter {
            let matched = if key == "source" {
                &event.source == expected
            } else if let Some(path) = key.strip_prefix("data.") {
                match event.data_path(path) {
                    Some(Value::String(s)) => s == expected,
                    Some(other) => &other.to_string() == expected,
                    None => false,
                }
            } else {
                false
            };
            if !matched {
                return false;
            }
        }
        true
    }

    async fn execute_action(&self, rule: &AutomationRule, event: &Event) {
        let config: HashMap<String, String> = rule
            .action_config
            .iter()
            .map(|(k, v)| (k.clone(), substitute_event(v, event)))
            .collect();

        let result = match rule.action_type {
            ActionType::RunSkill => {
                let skill_name = match config.get("skill") {
                    Some(name) => name,
                    None => {
                        log::error!("rule '{}' run_skill action missing 'skill' key", rule.name);
                        return;
                    }
                };
                let args: HashMap<String, Value> = config
                    .iter()
                    .filter(|(k, _)| k.as_str() != "skill")
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                self.skills.execute(skill_name, args).await
            }
            ActionType::RunScript => {
                let script_name = match config.get("script") {
                    Some(name) => name,
                    None => {
                        log::error!("rule '{}' run_script action missing 'script' key", rule.name);
                        return;
                    }
                };
                let vars: HashMap<String, String> = config
                    .iter()
                    .filter(|(k, _)| k.as_str() != "script")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                match self.scripts.run(script_name, vars).await {
                    Ok(summary) => summary,
                    Err(err) => format!("Error: {}", err),
                }
            }
            ActionType::SendNotification => {
                let message = config.get("message").cloned().unwrap_or_default();
                let channels: Vec<String> = config
                    .get("channels")
                    .map(|c| c.split(',').map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect())
                    .unwrap_or_default();
                self.notifications.notify(&message, &channels).await;
                message
            }
            ActionType::SendMessage => {
                let message = config.get("message").cloned().unwrap_or_default();
                match self.notifications.send_as_clara(&self.orchestrator, &message).await {
                    Ok(reply) => reply,
                    Err(err) => format!("Error: {}", err),
                }
            }
        };

        log::debug!("automation rule '{}' produced: {}", rule.name, result);
    }
}

#[async_trait]
impl EventHandler for AutomationEngine {
    async fn handle(&self, event: &Event) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        for rule in self.store.all().await? {
            if !rule.enabled {
                continue;
            }
            if rule.event_type != event.event_type {
                continue;
            }
            if !Self::matches_filter(event, &rule.event_filter) {
                continue;
            }
            self.execute_action(&rule, event).await;
        }
        Ok(())
    }
}

//! The conversation orchestrator and its coupled engines.

pub mod agent_router;
pub mod agent_template;
pub mod automation;
pub mod channel;
pub mod client_wrapper;
pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod notification;
pub mod orchestrator;
pub mod planner;
pub mod script;
pub mod scheduler;
pub mod skill;
pub mod skills;
pub mod template_text;

use crate::conductor::agent_router::AgentRouter;
use crate::conductor::agent_template::TemplateLoader;
use crate::conductor::automation::{AutomationEngine, InMemoryRuleStore};
use crate::conductor::client_wrapper::ClientWrapper;
use crate::conductor::config::Config;
use crate::conductor::event::EventBus;
use crate::conductor::memory::{InMemoryConversationStore, InMemoryFactStore};
use crate::conductor::notification::NotificationService;
use crate::conductor::orchestrator::ChatOrchestrator;
use crate::conductor::scheduler::{InMemoryJobStore, Scheduler};
use crate::conductor::script::ScriptEngine;
use crate::conductor::skill::SkillRegistry;
use std::sync::Arc;

/// Wires together the orchestrator and every side system into one
/// running instance. This is the crate's top-level entry point;
/// fatal setup errors (an unreachable templates directory, for
/// instance) are returned from [`Conductor::bootstrap`] rather than
/// exiting the process, leaving that decision to the embedding binary.
pub struct Conductor {
    /// The conversation orchestrator.
    pub orchestrator: Arc<ChatOrchestrator>,
    /// Sub-agent delegation.
    pub agent_router: Arc<AgentRouter>,
    /// Registered skills.
    pub skills: Arc<SkillRegistry>,
    /// Shared event bus.
    pub event_bus: Arc<EventBus>,
    /// Cron job scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Event-triggered automation rules.
    pub automation: Arc<AutomationEngine>,
    /// Named skill-invocation scripts.
    pub scripts: Arc<ScriptEngine>,
    /// Multi-channel notification fan-out.
    pub notifications: Arc<NotificationService>,
}

impl Conductor {
    /// Build every component from `client`, `skills`, and `config`, load
    /// agent templates and scheduled jobs, and attach the automation
    /// engine to the event bus. Returns an `Err` on unrecoverable setup
    /// failure (e.g. the agent templates directory exists but can't be
    /// read).
    pub async fn bootstrap(
        client: Arc<dyn ClientWrapper>,
        skills: Arc<SkillRegistry>,
        system_prompt: impl Into<String>,
        config: Config,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let event_bus = Arc::new(EventBus::new());
        let loader = TemplateLoader::new(config.agent_templates_dir.clone());
        let agent_router = Arc::new(AgentRouter::new(client.clone(), skills.clone(), loader).await?);

        let conversation_store = Arc::new(InMemoryConversationStore::new());
        let fact_store = Arc::new(InMemoryFactStore::new());
        let orchestrator = Arc::new(ChatOrchestrator::new(
            client,
            skills.clone(),
            agent_router.clone(),
            conversation_store,
            fact_store,
            system_prompt,
            config.clone(),
        ));

        let scripts = Arc::new(ScriptEngine::new(config.scripts_dir.clone(), skills.clone()));
        let notifications = Arc::new(NotificationService::new());

        let scheduler = Arc::new(
            Scheduler::new(Arc::new(InMemoryJobStore::new()), skills.clone(), event_bus.clone())
                .with_notifications(notifications.clone()),
        );
        scheduler.start_all().await?;

        let automation = Arc::new(AutomationEngine::new(
            Arc::new(InMemoryRuleStore::new()),
            skills.clone(),
            scripts.clone(),
            notifications.clone(),
            orchestrator.clone(),
        ));
        automation.attach(&event_bus).await;

        Ok(Conductor {
            orchestrator,
            agent_router,
            skills,
            event_bus,
            scheduler,
            automation,
            scripts,
            notifications,
        })
    }
}

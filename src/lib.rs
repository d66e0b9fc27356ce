// src/lib.rs

// Import the top-level `conductor` module.
pub mod conductor;

// Re-exporting key items for easier external access.
pub use conductor::agent_router::{AgentRouter, AgentRunResult};
pub use conductor::agent_template::{AgentTemplate, TemplateLoader};
pub use conductor::automation::{ActionType, AutomationEngine, AutomationRule};
pub use conductor::channel::{
    CapturedEvent, Channel, ChatBridgeChannel, CollectorChannel, WebSocketChannel,
};
pub use conductor::client_wrapper::{
    ClientWrapper, EchoClient, Message, NativeToolCall, Role, ToolDefinition,
};
pub use conductor::config::Config;
pub use conductor::error::OrchestratorError;
pub use conductor::event::{Event, EventBus};
pub use conductor::notification::NotificationService;
pub use conductor::orchestrator::ChatOrchestrator;
pub use conductor::scheduler::Scheduler;
pub use conductor::script::{Script, ScriptEngine};
pub use conductor::skill::{Skill, SkillRegistry};
pub use conductor::Conductor;

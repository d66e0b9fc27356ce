//! Error kinds that callers need to branch on.
//!
//! Most fallible calls in this crate return
//! `Result<T, Box<dyn std::error::Error + Send + Sync>>`, matching the loose
//! error propagation used throughout the orchestrator and planner. This
//! module carries the handful of error *kinds* that a caller legitimately
//! needs to distinguish — tool not found, access denied, agent not found,
//! and an upstream timeout — so they don't get flattened into opaque
//! strings too early.
//!
//! `SkillNotFound` backs [`crate::conductor::skill::SkillRegistry::execute`]'s
//! error string, `AccessDenied` backs [`crate::conductor::planner::AllowlistPolicy`]'s
//! denial reason, and `AgentNotFound` backs
//! [`crate::conductor::agent_router::AgentRouter::run_agent`].

use std::error::Error;
use std::fmt;

/// Errors surfaced by the orchestrator, router, or registry that a caller
/// (or a test) may want to match on rather than just display.
#[derive(Debug, Clone)]
pub enum OrchestratorError {
    /// No skill is registered under this name.
    SkillNotFound(String),
    /// The tool or agent lies outside the caller's `allowed_skills` set.
    AccessDenied(String),
    /// No agent template is registered under this name.
    AgentNotFound(String),
    /// The upstream LLM did not respond within the configured timeout.
    UpstreamTimeout(String),
    /// Catch-all for conditions that don't need their own variant yet.
    Other(String),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::SkillNotFound(name) => {
                write!(f, "skill '{}' not found", name)
            }
            OrchestratorError::AccessDenied(name) => {
                write!(f, "access to '{}' is not allowed", name)
            }
            OrchestratorError::AgentNotFound(name) => {
                write!(f, "agent '{}' not found", name)
            }
            OrchestratorError::UpstreamTimeout(detail) => {
                write!(f, "upstream LLM call timed out: {}", detail)
            }
            OrchestratorError::Other(detail) => write!(f, "{}", detail),
        }
    }
}

impl Error for OrchestratorError {}

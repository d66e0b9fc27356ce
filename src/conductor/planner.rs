//! The bounded tool-calling loop shared by the top-level orchestrator
//! and every delegated sub-agent.
//!
//! Grounded on the teacher's `planner.rs`: a `Planner` trait plus a
//! `BasicPlanner` implementation parameterized by a `PlannerContext`
//! bundling the session, tool registry, and event hooks, with
//! `PlannerEvent` callbacks fired at each stage. Adapted so the loop
//! runs over native [`crate::conductor::client_wrapper::ClientWrapper`] tool_calls
//! instead of a prompt-embedded tool-call parser, and so a single round
//! can contain both sequential delegations (sub-agent calls) and a
//! concurrent fan-out of regular skill calls, per the chat orchestrator
//! and agent router's shared control flow.

use crate::conductor::client_wrapper::{ClientWrapper, Message, NativeToolCall, Role, ToolDefinition};
use crate::conductor::error::OrchestratorError;
use crate::conductor::skill::SkillRegistry;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One resolved tool call: the request plus its string result.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Provider-assigned id, echoed back as a `Role::Tool` message.
    pub call_id: String,
    /// Tool name that was invoked.
    pub name: String,
    /// Arguments actually passed (after filtering to declared params).
    pub arguments: Value,
    /// String result, or a human-readable error string — callers never
    /// see a bare `Err` from a tool call.
    pub result: String,
}

/// Decision returned by a policy check before a tool call executes.
#[derive(Debug, Clone)]
pub enum PolicyDecision {
    /// Allow the call to proceed.
    Allow,
    /// Refuse the call with a human-readable reason. The reason is
    /// surfaced back to the LLM as the tool's result.
    Deny(String),
}

/// Gatekeeper invoked before every tool call. The orchestrator's
/// `allowed_skills` enforcement (defense-in-depth even though the tool
/// list handed to the LLM was already filtered) is implemented as a
/// `PolicyEngine`.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Decide whether `call` may execute.
    async fn allow_tool_call(&self, call: &NativeToolCall) -> PolicyDecision;
}

/// A policy that allows every call, used when there is no
/// `allowed_skills` restriction in effect.
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyEngine for AllowAllPolicy {
    async fn allow_tool_call(&self, _call: &NativeToolCall) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

/// A policy restricting calls to a fixed allowlist of tool names.
pub struct AllowlistPolicy {
    allowed: Vec<String>,
}

impl AllowlistPolicy {
    /// Only calls to a name in `allowed` succeed.
    pub fn new(allowed: Vec<String>) -> Self {
        AllowlistPolicy { allowed }
    }
}

#[async_trait]
impl PolicyEngine for AllowlistPolicy {
    async fn allow_tool_call(&self, call: &NativeToolCall) -> PolicyDecision {
        if self.allowed.iter().any(|a| a == &call.name) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Deny(OrchestratorError::AccessDenied(call.name.clone()).to_string())
        }
    }
}

/// Hooks fired as a loop progresses, used by the orchestrator to push
/// frames to a [`crate::conductor::channel::Channel`] and by the automation engine
/// to observe sub-agent activity.
#[async_trait]
pub trait LoopObserver: Send + Sync {
    /// A tool call was detected in the LLM's response and is about to run.
    async fn on_tool_start(&self, _call: &NativeToolCall) {}
    /// A tool call finished, successfully or not.
    async fn on_tool_end(&self, _result: &ToolResult) {}
    /// One streamed token of the final answer.
    async fn on_stream_token(&self, _token: &str) {}
}

/// No-op observer.
pub struct NoopObserver;

#[async_trait]
impl LoopObserver for NoopObserver {}

/// What a bounded loop run needs: the conversation so far, the tool
/// definitions to offer, an optional policy gate, and an observer.
pub struct LoopContext<'a> {
    /// LLM client driving this loop.
    pub client: &'a dyn ClientWrapper,
    /// Skill registry used to actually execute regular tool calls.
    pub skills: &'a SkillRegistry,
    /// Tool schemas offered to the LLM this round. Distinct from the
    /// full registry so delegation tools (`delegate_to_agent`) and
    /// per-agent allowlists can be layered on top.
    pub tool_definitions: Vec<ToolDefinition>,
    /// Names of tools that are sub-agent delegations rather than
    /// regular skills; these run sequentially and are resolved by
    /// `delegate`, not `skills.execute`.
    pub delegation_tool_names: Vec<String>,
    /// Policy gate applied before every tool call (defense-in-depth
    /// access control).
    pub policy: &'a dyn PolicyEngine,
    /// Progress/streaming hooks.
    pub observer: &'a dyn LoopObserver,
    /// Maximum rounds before the loop force-stops.
    pub max_rounds: usize,
}

/// Everything a completed loop run produced.
pub struct LoopOutcome {
    /// Unique id for this run, for correlating log lines across a turn
    /// that may fan out into several delegated sub-agent runs.
    pub run_id: uuid::Uuid,
    /// The LLM's final textual response (un-scrubbed; callers apply
    /// think-block scrubbing and streaming fallback themselves).
    pub final_message: Message,
    /// Every tool call made during the run, in call order.
    pub tool_calls: Vec<ToolResult>,
    /// Whether the loop stopped because it hit `max_rounds` rather than
    /// because the LLM stopped requesting tools.
    pub hit_max_rounds: bool,
}

/// Resolve a single delegation tool call to its result text. Implemented
/// by [`crate::conductor::agent_router::AgentRouter`] for `delegate_to_agent`; kept
/// as a trait so `planner` has no dependency on `agent_router`.
#[async_trait]
pub trait Delegate: Send + Sync {
    /// Run the named delegation and return its textual result.
    async fn delegate(&self, call: &NativeToolCall) -> String;
}

/// The bounded tool-calling loop itself: up to `max_rounds` rounds of
/// "call the LLM, run any requested tools, feed results back", run once
/// for a full conversation turn, and again internally for every
/// delegated sub-agent. Delegation calls in a round run sequentially;
/// regular (skill) calls in the same round run as a concurrent
/// fan-out, each failure captured individually rather than aborting
/// the round.
pub async fn run_bounded_loop(
    messages: &mut Vec<Message>,
    ctx: LoopContext<'_>,
    delegate: Option<&dyn Delegate>,
) -> Result<LoopOutcome, Box<dyn std::error::Error + Send + Sync>> {
    let run_id = uuid::Uuid::new_v4();
    let mut all_tool_calls = Vec::new();
    let mut round = 0usize;
    let mut hit_max_rounds = false;

    loop {
        let tools = if ctx.tool_definitions.is_empty() {
            None
        } else {
            Some(ctx.tool_definitions.as_slice())
        };
        let response = ctx.client.chat(messages, tools).await?;

        if response.tool_calls.is_empty() {
            log::debug!("loop {} finished after {} round(s), no further tool calls", run_id, round);
            return Ok(LoopOutcome {
                run_id,
                final_message: response,
                tool_calls: all_tool_calls,
                hit_max_rounds,
            });
        }

        if round >= ctx.max_rounds {
            hit_max_rounds = true;
            log::warn!("loop {} hit max_rounds ({})", run_id, ctx.max_rounds);
            messages.push(Message::new(
                Role::Assistant,
                "Maximum tool-call rounds reached; answering with what is known so far.",
            ));
            let fallback = ctx.client.chat(messages, None).await?;
            return Ok(LoopOutcome {
                run_id,
                final_message: fallback,
                tool_calls: all_tool_calls,
                hit_max_rounds,
            });
        }

        let (delegations, regular): (Vec<_>, Vec<_>) = response
            .tool_calls
            .iter()
            .cloned()
            .partition(|c| ctx.delegation_tool_names.iter().any(|d| d == &c.name));

        let mut round_results = Vec::new();

        for call in delegations {
            ctx.observer.on_tool_start(&call).await;
            let result_text = match (ctx.policy.allow_tool_call(&call).await, delegate) {
                (PolicyDecision::Deny(reason), _) => format!("Tool call denied: {}", reason),
                (PolicyDecision::Allow, Some(delegate)) => delegate.delegate(&call).await,
                (PolicyDecision::Allow, None) => {
                    "Tool call denied: no delegate configured".to_string()
                }
            };
            let result = ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: result_text,
            };
            ctx.observer.on_tool_end(&result).await;
            round_results.push(result);
        }

        let observer = ctx.observer;
        let policy = ctx.policy;
        let skills = ctx.skills;
        let fanout = regular.into_iter().map(|call| async move {
            observer.on_tool_start(&call).await;
            let result_text = match policy.allow_tool_call(&call).await {
                PolicyDecision::Deny(reason) => format!("Tool call denied: {}", reason),
                PolicyDecision::Allow => {
                    let args: HashMap<String, Value> = call
                        .arguments
                        .as_object()
                        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                        .unwrap_or_default();
                    skills.execute(&call.name, args).await
                }
            };
            let result = ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: result_text,
            };
            observer.on_tool_end(&result).await;
            result
        });
        round_results.extend(join_all(fanout).await);

        for result in &round_results {
            let mut single_call = Message::new(Role::Assistant, "");
            single_call.tool_calls = vec![NativeToolCall {
                id: result.call_id.clone(),
                name: result.name.clone(),
                arguments: result.arguments.clone(),
            }];
            messages.push(single_call);
            messages.push(Message::tool_result(result.call_id.clone(), result.result.clone()));
        }
        all_tool_calls.extend(round_results);

        round += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::skill::Skill;
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedClient {
        responses: std::sync::Mutex<Vec<Message>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ClientWrapper for ScriptedClient {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
        ) -> Result<Message, Box<dyn Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(Message::new(Role::Assistant, "done"))
            } else {
                Ok(responses.remove(0))
            }
        }

        async fn generate(&self, prompt: &str) -> Result<String, Box<dyn Error + Send + Sync>> {
            Ok(prompt.to_string())
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct Echo;

    #[async_trait]
    impl Skill for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }
        async fn execute(
            &self,
            args: HashMap<String, Value>,
        ) -> Result<String, Box<dyn Error + Send + Sync>> {
            Ok(args.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string())
        }
    }

    fn tool_call(name: &str) -> NativeToolCall {
        NativeToolCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments: serde_json::json!({ "text": "hi" }),
        }
    }

    #[tokio::test]
    async fn loop_terminates_without_tool_calls() {
        let client = ScriptedClient {
            responses: std::sync::Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        };
        let mut registry = SkillRegistry::new();
        registry.register(Arc::new(Echo));
        let mut messages = vec![Message::new(Role::User, "hi")];
        let outcome = run_bounded_loop(
            &mut messages,
            LoopContext {
                client: &client,
                skills: &registry,
                tool_definitions: vec![],
                delegation_tool_names: vec![],
                policy: &AllowAllPolicy,
                observer: &NoopObserver,
                max_rounds: 5,
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.tool_calls.len(), 0);
        assert!(!outcome.hit_max_rounds);
    }

    #[tokio::test]
    async fn tool_result_count_matches_tool_call_count() {
        let mut first_response = Message::new(Role::Assistant, "");
        first_response.tool_calls = vec![tool_call("echo"), tool_call("echo")];
        let client = ScriptedClient {
            responses: std::sync::Mutex::new(vec![first_response]),
            calls: AtomicUsize::new(0),
        };
        let mut registry = SkillRegistry::new();
        registry.register(Arc::new(Echo));
        let mut messages = vec![Message::new(Role::User, "hi")];
        let outcome = run_bounded_loop(
            &mut messages,
            LoopContext {
                client: &client,
                skills: &registry,
                tool_definitions: vec![],
                delegation_tool_names: vec![],
                policy: &AllowAllPolicy,
                observer: &NoopObserver,
                max_rounds: 5,
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.tool_calls.len(), 2);
    }

    #[tokio::test]
    async fn each_tool_call_gets_its_own_assistant_and_tool_message_pair() {
        let mut first_response = Message::new(Role::Assistant, "");
        first_response.tool_calls = vec![tool_call("echo"), tool_call("echo")];
        let client = ScriptedClient {
            responses: std::sync::Mutex::new(vec![first_response]),
            calls: AtomicUsize::new(0),
        };
        let mut registry = SkillRegistry::new();
        registry.register(Arc::new(Echo));
        let mut messages = vec![Message::new(Role::User, "hi")];
        run_bounded_loop(
            &mut messages,
            LoopContext {
                client: &client,
                skills: &registry,
                tool_definitions: vec![],
                delegation_tool_names: vec![],
                policy: &AllowAllPolicy,
                observer: &NoopObserver,
                max_rounds: 5,
            },
            None,
        )
        .await
        .unwrap();

        // Initial user message, then (assistant, tool) per call: 1 + 2*2 = 5.
        assert_eq!(messages.len(), 5);
        assert!(matches!(messages[1].role, Role::Assistant));
        assert_eq!(messages[1].tool_calls.len(), 1);
        assert!(matches!(messages[2].role, Role::Tool { .. }));
        assert!(matches!(messages[3].role, Role::Assistant));
        assert_eq!(messages[3].tool_calls.len(), 1);
        assert!(matches!(messages[4].role, Role::Tool { .. }));
    }

    #[tokio::test]
    async fn denied_tool_call_never_executes() {
        let mut first_response = Message::new(Role::Assistant, "");
        first_response.tool_calls = vec![tool_call("echo")];
        let client = ScriptedClient {
            responses: std::sync::Mutex::new(vec![first_response]),
            calls: AtomicUsize::new(0),
        };
        let mut registry = SkillRegistry::new();
        registry.register(Arc::new(Echo));
        let mut messages = vec![Message::new(Role::User, "hi")];
        let outcome = run_bounded_loop(
            &mut messages,
            LoopContext {
                client: &client,
                skills: &registry,
                tool_definitions: vec![],
                delegation_tool_names: vec![],
                policy: &AllowlistPolicy::new(vec!["other".to_string()]),
                observer: &NoopObserver,
                max_rounds: 5,
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.tool_calls.len(), 1);
        assert!(outcome.tool_calls[0].result.contains("denied"));
    }

    #[tokio::test]
    async fn loop_stops_at_max_rounds() {
        let mut looping_response = Message::new(Role::Assistant, "");
        looping_response.tool_calls = vec![tool_call("echo")];
        let client = ScriptedClient {
            responses: std::sync::Mutex::new(vec![
                looping_response.clone(),
                looping_response.clone(),
                looping_response,
            ]),
            calls: AtomicUsize::new(0),
        };
        let mut registry = SkillRegistry::new();
        registry.register(Arc::new(Echo));
        let mut messages = vec![Message::new(Role::User, "hi")];
        let outcome = run_bounded_loop(
            &mut messages,
            LoopContext {
                client: &client,
                skills: &registry,
                tool_definitions: vec![],
                delegation_tool_names: vec![],
                policy: &AllowAllPolicy,
                observer: &NoopObserver,
                max_rounds: 2,
            },
            None,
        )
        .await
        .unwrap();
        assert!(outcome.hit_max_rounds);
        assert!(outcome.tool_calls.len() <= 2);
    }
}

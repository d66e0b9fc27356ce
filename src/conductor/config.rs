use std::path::PathBuf;

/// Runtime configuration for a [`crate::Conductor`] instance.
///
/// This struct is intentionally minimal and users construct it however
/// they want. No TOML, YAML, or other config-file parsing dependencies
/// are introduced for application configuration — agent templates and
/// scripts parse YAML (see [`crate::conductor::agent_template`] and
/// [`crate::conductor::script`]), but that is record-file parsing, not app config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `_builtin/` and `custom/` agent template subdirs.
    pub agent_templates_dir: PathBuf,
    /// Directory holding persisted script YAML files.
    pub scripts_dir: PathBuf,
    /// How many recent messages to load for a session before a turn
    /// (spec default `H = 20`).
    pub history_window: usize,
    /// How many recent memory facts to fold into the system prompt
    /// (spec default `N = 30`, matching the original's `context_builder`).
    pub memory_context_limit: usize,
    /// Maximum tool-calling rounds per turn before the loop is forced to
    /// stop (spec default 5).
    pub max_rounds: usize,
    /// Open question (a): whether `<think>...</think>` blocks are
    /// stripped from LLM output. Default on; reproduces the original
    /// heuristic verbatim when enabled.
    pub strip_think_blocks: bool,
    /// Open question (c): the fact-extraction prompt is configuration,
    /// not logic. `{conversation}` is substituted with the user+assistant
    /// turn before the prompt is sent to the LLM.
    pub fact_extraction_prompt: String,
    /// Maximum character length for a single outbound chat-bridge message
    /// chunk before splitting (§4.4).
    pub channel_message_char_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_templates_dir: PathBuf::from("agent_templates"),
            scripts_dir: PathBuf::from("scripts"),
            history_window: 20,
            memory_context_limit: 30,
            max_rounds: 5,
            strip_think_blocks: true,
            fact_extraction_prompt: default_fact_extraction_prompt(),
            channel_message_char_limit: 2000,
        }
    }
}

fn default_fact_extraction_prompt() -> String {
    "Analyze the following conversation excerpt between a user and an AI assistant.\n\
     Extract ALL new facts about the user.\n\n\
     Return ONLY a JSON array. Each element has: category, key, value\n\n\
     Rules:\n\
     - Only EXPLICITLY stated facts, invent NOTHING\n\
     - Short, concise values (max 100 characters)\n\
     - Keys as short identifiers (e.g. \"favorite_language\", \"occupation\", \"pet\")\n\
     - If NO facts are found: empty array []\n\
     - NO explanatory text, ONLY the JSON array\n\n\
     Conversation:\n{conversation}\n\n\
     JSON array:"
        .to_string()
}

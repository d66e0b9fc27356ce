//! Generic system-command skill.
//!
//! Adapted from the teacher's `tools::BashTool`: a configurable shell
//! runner with a timeout and an optional command allowlist. The
//! scheduler (§4.5) invokes this skill by name to run a scheduled job's
//! command, so it is kept as a first-class skill rather than scheduler-
//! internal plumbing.

use crate::conductor::skill::Skill;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

/// Runs a shell command and returns its combined stdout/stderr.
///
/// When `allowed_commands` is `Some`, only commands whose first
/// whitespace-separated token matches an entry are permitted; anything
/// else is rejected before a process is spawned.
pub struct SystemCommandSkill {
    shell_path: String,
    timeout: Duration,
    allowed_commands: Option<Vec<String>>,
}

impl Default for SystemCommandSkill {
    fn default() -> Self {
        SystemCommandSkill {
            shell_path: "/bin/bash".to_string(),
            timeout: Duration::from_secs(30),
            allowed_commands: None,
        }
    }
}

impl SystemCommandSkill {
    /// A skill with no allowlist and the default 30s timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Restrict execution to commands whose leading token is in `commands`.
    pub fn with_allowed_commands(mut self, commands: Vec<String>) -> Self {
        self.allowed_commands = Some(commands);
        self
    }

    fn is_allowed(&self, command: &str) -> bool {
        match &self.allowed_commands {
            None => true,
            Some(allowed) => {
                let first_token = command.split_whitespace().next().unwrap_or("");
                allowed.iter().any(|a| a == first_token)
            }
        }
    }
}

#[async_trait]
impl Skill for SystemCommandSkill {
    fn name(&self) -> &str {
        "system_command"
    }

    fn description(&self) -> &str {
        "Runs a shell command and returns its combined stdout and stderr."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        args: HashMap<String, Value>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or("missing required argument 'command'")?;

        if !self.is_allowed(command) {
            return Ok(format!("Error: command '{}' is not in the allowlist", command));
        }

        let child = TokioCommand::new(&self.shell_path)
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Ok(format!("Error: command timed out after {:?}", self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            Ok(stdout.trim_end().to_string())
        } else {
            Ok(format!(
                "Error (exit code {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim_end()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_command() {
        let skill = SystemCommandSkill::new();
        let mut args = HashMap::new();
        args.insert("command".to_string(), Value::String("echo hello".to_string()));
        let result = skill.execute(args).await.unwrap();
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn rejects_command_outside_allowlist() {
        let skill = SystemCommandSkill::new().with_allowed_commands(vec!["echo".to_string()]);
        let mut args = HashMap::new();
        args.insert("command".to_string(), Value::String("rm -rf /tmp/x".to_string()));
        let result = skill.execute(args).await.unwrap();
        assert!(result.contains("not in the allowlist"));
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let skill = SystemCommandSkill::new();
        let mut args = HashMap::new();
        args.insert("command".to_string(), Value::String("exit 3".to_string()));
        let result = skill.execute(args).await.unwrap();
        assert!(result.contains("exit code 3"));
    }
}

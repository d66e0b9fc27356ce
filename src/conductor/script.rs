//! Script engine: named, ordered sequences of skill invocations.
//!
//! Grounded on `scripts/script_engine.py`: YAML-persisted records of
//! `{skill, args, stop_on_error}` steps, `${var}` substitution from
//! supplied variables plus each prior step's result under
//! `step_<i>_result`, and an error sentinel check that halts the run
//! only when `stop_on_error` is set on that step.

use crate::conductor::skill::SkillRegistry;
use crate::conductor::template_text::substitute_vars;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A single step: run `skill` with `args` (after `${var}` substitution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Skill name to invoke.
    pub skill: String,
    /// Argument map; string values go through `${var}` substitution.
    #[serde(default)]
    pub args: HashMap<String, String>,
    /// Halt the script if this step's result looks like an error.
    #[serde(default)]
    pub stop_on_error: bool,
}

/// A named, ordered sequence of skill invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// Unique name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Steps run in order.
    pub steps: Vec<ScriptStep>,
}

/// Prefix used to detect an error result from a step, mirroring the
/// original's sentinel-based `stop_on_error` check.
pub const ERROR_SENTINEL: &str = "Error";

/// Persists and runs [`Script`]s against a [`SkillRegistry`].
pub struct ScriptEngine {
    scripts_dir: PathBuf,
    skills: std::sync::Arc<SkillRegistry>,
}

impl ScriptEngine {
    /// Point the engine at a directory of `<name>.yaml` script files.
    pub fn new(scripts_dir: impl Into<PathBuf>, skills: std::sync::Arc<SkillRegistry>) -> Self {
        ScriptEngine {
            scripts_dir: scripts_dir.into(),
            skills,
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.scripts_dir.join(format!("{}.yaml", name))
    }

    /// Persist a new script.
    pub fn create(&self, script: &Script) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        fs::create_dir_all(&self.scripts_dir)?;
        let yaml = serde_yaml::to_string(script)?;
        fs::write(self.path_for(&script.name), yaml)?;
        Ok(())
    }

    /// Remove a script by name. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let path = self.path_for(name);
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Load a single script by name.
    pub fn get(&self, name: &str) -> Result<Option<Script>, Box<dyn std::error::Error + Send + Sync>> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_yaml::from_str(&contents)?))
    }

    /// Every script in the directory.
    pub fn list_scripts(&self) -> Result<Vec<Script>, Box<dyn std::error::Error + Send + Sync>> {
        let mut scripts = Vec::new();
        if !self.scripts_dir.is_dir() {
            return Ok(scripts);
        }
        for entry in fs::read_dir(&self.scripts_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
                let contents = fs::read_to_string(&path)?;
                scripts.push(serde_yaml::from_str(&contents)?);
            }
        }
        Ok(scripts)
    }

    /// Run `name` with `vars` as the initial variable scope, returning
    /// the concatenation of each step's summary line. Halts early only
    /// when a step both errors and has `stop_on_error` set.
    pub async fn run(
        &self,
        name: &str,
        vars: HashMap<String, String>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let script = self
            .get(name)?
            .ok_or_else(|| format!("script '{}' not found", name))?;

        let mut scope = vars;
        let mut summaries = Vec::new();

        for (index, step) in script.steps.iter().enumerate() {
            let args: HashMap<String, serde_json::Value> = step
                .args
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(substitute_vars(v, &scope))))
                .collect();

            let result = self.skills.execute(&step.skill, args).await;
            scope.insert(format!("step_{}_result", index), result.clone());
            summaries.push(format!("{}: {}", step.skill, result));

            if step.stop_on_error && result.starts_with(ERROR_SENTINEL) {
                break;
            }
        }

        Ok(summaries.join("\n"))
    }
}

fn path_exists(path: &Path) -> bool {
    path.exists()
}

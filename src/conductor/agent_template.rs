//! Agent templates: named sub-agent configurations loaded from disk.
//!
//! Grounded on `agents/template_loader.py`: a builtin/custom two-tier
//! directory layout where custom templates override builtin ones by
//! name, YAML records with a `model_env` indirection for picking the
//! model id from an environment variable, and unknown YAML fields
//! ignored rather than rejected.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A named sub-agent configuration: model, optional system prompt, and
/// an optional allowlist of skills it may use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTemplate {
    /// Unique name; `"general"` is reserved for the top-level orchestrator
    /// and is never offered as a delegation target.
    pub name: String,
    /// Human-readable description surfaced in the `delegate_to_agent`
    /// tool schema.
    pub description: String,
    /// Model identifier used for this agent's own LLM calls.
    pub model: String,
    /// Optional system prompt prepended to the sub-agent's isolated
    /// message buffer.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Skill names this agent may use. `None` means all registered
    /// skills are available.
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    /// Maximum tool-calling rounds for this agent's own loop.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Optional sampling temperature override.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// How many recent user/assistant messages from the parent
    /// conversation are copied into the sub-agent's isolated buffer.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Whether this template came from the builtin directory. Builtin
    /// templates cannot be edited or deleted through
    /// [`TemplateLoader::save_template`]/[`TemplateLoader::delete_template`].
    #[serde(default)]
    pub builtin: bool,
}

fn default_max_rounds() -> usize {
    5
}

fn default_context_window() -> usize {
    4
}

/// Raw on-disk representation before `model_env` indirection is
/// resolved and unknown fields are dropped.
#[derive(Debug, Deserialize)]
struct RawTemplate {
    name: String,
    description: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    model_env: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    skills: Option<Vec<String>>,
    #[serde(default = "default_max_rounds")]
    max_rounds: usize,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default = "default_context_window")]
    context_window: usize,
    #[serde(flatten)]
    #[allow(dead_code)]
    extra: HashMap<String, serde_yaml::Value>,
}

const BUILTIN_SUBDIR: &str = "_builtin";
const CUSTOM_SUBDIR: &str = "custom";

/// Loads [`AgentTemplate`]s from `templates_dir/_builtin` and
/// `templates_dir/custom`, with custom entries overriding builtin ones
/// by name.
pub struct TemplateLoader {
    templates_dir: PathBuf,
}

impl TemplateLoader {
    /// Point the loader at a directory expected to contain `_builtin/`
    /// and `custom/` subdirectories (either may be absent).
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        TemplateLoader {
            templates_dir: templates_dir.into(),
        }
    }

    /// Load every builtin template, then overlay every custom template
    /// on top by name. Returns templates keyed by name.
    pub fn load_all(&self) -> Result<HashMap<String, AgentTemplate>, Box<dyn std::error::Error + Send + Sync>> {
        let mut templates = HashMap::new();
        self.load_dir(&self.templates_dir.join(BUILTIN_SUBDIR), true, &mut templates)?;
        self.load_dir(&self.templates_dir.join(CUSTOM_SUBDIR), false, &mut templates)?;
        Ok(templates)
    }

    fn load_dir(
        &self,
        dir: &Path,
        is_builtin: bool,
        out: &mut HashMap<String, AgentTemplate>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml")
                && path.extension().and_then(|e| e.to_str()) != Some("yml")
            {
                continue;
            }
            let template = Self::parse(&path, is_builtin)?;
            out.insert(template.name.clone(), template);
        }
        Ok(())
    }

    fn parse(path: &Path, is_builtin: bool) -> Result<AgentTemplate, Box<dyn std::error::Error + Send + Sync>> {
        let contents = fs::read_to_string(path)?;
        let raw: RawTemplate = serde_yaml::from_str(&contents)?;
        let model = match (raw.model, raw.model_env) {
            (Some(model), _) => model,
            (None, Some(env_var)) => std::env::var(&env_var)
                .map_err(|_| format!("model_env '{}' is not set", env_var))?,
            (None, None) => return Err(format!("template '{}' has neither model nor model_env", raw.name).into()),
        };
        Ok(AgentTemplate {
            name: raw.name,
            description: raw.description,
            model,
            system_prompt: raw.system_prompt,
            skills: raw.skills,
            max_rounds: raw.max_rounds,
            temperature: raw.temperature,
            context_window: raw.context_window,
            builtin: is_builtin,
        })
    }

    /// Persist `template` into the custom directory, creating it if
    /// needed. Refuses to overwrite a builtin template's source file.
    pub fn save_template(&self, template: &AgentTemplate) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if template.builtin {
            return Err(format!("cannot save over builtin template '{}'", template.name).into());
        }
        let dir = self.templates_dir.join(CUSTOM_SUBDIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.yaml", template.name));
        let yaml = serde_yaml::to_string(template)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Remove a custom template by name. Returns `false` if no such
    /// file exists; builtin templates are never deleted this way.
    pub fn delete_template(&self, name: &str) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let path = self.templates_dir.join(CUSTOM_SUBDIR).join(format!("{}.yaml", name));
        if path.exists() {
            fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_yaml(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(format!("{}.yaml", name)), contents).unwrap();
    }

    #[test]
    fn custom_overrides_builtin_by_name() {
        let dir = tempdir().unwrap();
        let builtin = dir.path().join(BUILTIN_SUBDIR);
        let custom = dir.path().join(CUSTOM_SUBDIR);
        fs::create_dir_all(&builtin).unwrap();
        fs::create_dir_all(&custom).unwrap();

        write_yaml(
            &builtin,
            "research",
            "name: research\ndescription: builtin researcher\nmodel: gpt-4\n",
        );
        write_yaml(
            &custom,
            "research",
            "name: research\ndescription: custom researcher\nmodel: gpt-4-turbo\n",
        );

        let loader = TemplateLoader::new(dir.path());
        let templates = loader.load_all().unwrap();
        let tpl = templates.get("research").unwrap();
        assert_eq!(tpl.description, "custom researcher");
        assert!(!tpl.builtin);
    }

    #[test]
    fn model_env_indirection_resolves_from_environment() {
        let dir = tempdir().unwrap();
        let builtin = dir.path().join(BUILTIN_SUBDIR);
        fs::create_dir_all(&builtin).unwrap();
        std::env::set_var("CONDUCTOR_TEST_MODEL", "local-llama");
        write_yaml(
            &builtin,
            "coder",
            "name: coder\ndescription: writes code\nmodel_env: CONDUCTOR_TEST_MODEL\n",
        );
        let loader = TemplateLoader::new(dir.path());
        let templates = loader.load_all().unwrap();
        assert_eq!(templates.get("coder").unwrap().model, "local-llama");
    }

    #[test]
    fn save_then_reload_round_trips() {
        let dir = tempdir().unwrap();
        let loader = TemplateLoader::new(dir.path());
        let template = AgentTemplate {
            name: "planner".to_string(),
            description: "plans things".to_string(),
            model: "gpt-4".to_string(),
            system_prompt: Some("You plan.".to_string()),
            skills: Some(vec!["calculator".to_string()]),
            max_rounds: 3,
            temperature: Some(0.2),
            context_window: 8,
            builtin: false,
        };
        loader.save_template(&template).unwrap();
        let templates = loader.load_all().unwrap();
        let reloaded = templates.get("planner").unwrap();
        assert_eq!(reloaded.description, template.description);
        assert_eq!(reloaded.max_rounds, template.max_rounds);
        assert_eq!(reloaded.skills, template.skills);
    }

    #[test]
    fn delete_template_removes_custom_only() {
        let dir = tempdir().unwrap();
        let loader = TemplateLoader::new(dir.path());
        let template = AgentTemplate {
            name: "temp".to_string(),
            description: "d".to_string(),
            model: "m".to_string(),
            system_prompt: None,
            skills: None,
            max_rounds: 5,
            temperature: None,
            context_window: 4,
            builtin: false,
        };
        loader.save_template(&template).unwrap();
        assert!(loader.delete_template("temp").unwrap());
        assert!(!loader.delete_template("temp").unwrap());
    }
}

//! Shared string-templating helpers.
//!
//! Two substitution languages appear across the side-system components:
//! `{{event.type}}` / `{{event.source}}` / `{{event.data.<path>}}`
//! (grounded on `automation/automation_engine.py`'s `_substitute_text`,
//! which applies `re.sub(r"\{\{(event\.[^}]+)\}\}", ...)`), and
//! `${var}` (grounded on `scripts/script_engine.py`'s
//! `re.sub(r"\$\{(\w+)\}", ...)`). Both are implemented here with
//! `regex` so the automation engine, script engine, and orchestrator's
//! proactive-message path share one substitution implementation rather
//! than three.

use crate::conductor::event::Event;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref EVENT_PLACEHOLDER: Regex = Regex::new(r"\{\{(event\.[^}]+)\}\}").unwrap();
    static ref VAR_PLACEHOLDER: Regex = Regex::new(r"\$\{(\w+)\}").unwrap();
}

/// Replace every `{{event.*}}` placeholder in `text` with the matching
/// field from `event`. A placeholder whose path has no match resolves
/// to an empty string rather than being left in place.
pub fn substitute_event(text: &str, event: &Event) -> String {
    EVENT_PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures| {
            let path = &caps[1];
            resolve_event_path(event, path).unwrap_or_default()
        })
        .into_owned()
}

fn resolve_event_path(event: &Event, path: &str) -> Option<String> {
    match path {
        "event.type" => Some(event.event_type.clone()),
        "event.source" => Some(event.source.clone()),
        rest => {
            let data_path = rest.strip_prefix("event.data.")?;
            let value = event.data_path(data_path)?;
            Some(match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        }
    }
}

/// Replace every `${var}` placeholder in `text` using `vars`. A
/// placeholder with no corresponding entry resolves to an empty string.
pub fn substitute_vars(text: &str, vars: &HashMap<String, String>) -> String {
    VAR_PLACEHOLDER
        .replace_all(text, |caps: &regex::Captures| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

//! Trigger specifications and matching.
//!
//! Triggers live in `.workflows/triggers.yaml` of the target repository:
//!
//! ```yaml
//! - events: ["push", "pull_request.opened"]
//!   branches: ["main"]
//!   onStart: ["main.yaml"]
//!   onExit: ["exit.yaml"]
//!   templates: ["common.yaml"]
//!   config: default
//! ```
//!
//! Matching is exact and case-sensitive on both the branch and the
//! composite event key (`event` or `event.action`).

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::event::CanonicalEvent;

pub const DEFAULT_CONFIG_NAME: &str = "default";

fn default_config() -> String {
    DEFAULT_CONFIG_NAME.to_string()
}

/// One declarative trigger rule.
/// `events`, `branches` and `onStart` are required; they are kept optional
/// here so a missing field is reported as a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    pub events: Option<Vec<String>>,
    pub branches: Option<Vec<String>>,
    pub on_start: Option<Vec<String>>,
    pub on_exit: Option<Vec<String>>,
    pub templates: Option<Vec<String>>,
    #[serde(default = "default_config")]
    pub config: String,
}

impl Default for TriggerSpec {
    fn default() -> Self {
        Self {
            events: None,
            branches: None,
            on_start: None,
            on_exit: None,
            templates: None,
            config: default_config(),
        }
    }
}

impl TriggerSpec {
    /// Returns whether this trigger fires for `event`.
    /// Fails when a required field is missing.
    pub fn matches(&self, event: &CanonicalEvent) -> Result<bool> {
        let branches = self.branches.as_ref().ok_or_else(|| {
            EngineError::Config(format!(
                "trigger from repo {} branch {} missing branch field",
                event.repo, event.branch
            ))
        })?;
        let events = self.events.as_ref().ok_or_else(|| {
            EngineError::Config(format!(
                "trigger from repo {} branch {} missing event field",
                event.repo, event.branch
            ))
        })?;
        match &self.on_start {
            Some(on_start) if !on_start.is_empty() => {}
            _ => {
                return Err(EngineError::Config(format!(
                    "trigger from repo {} branch {} missing onStart field",
                    event.repo, event.branch
                )));
            }
        }

        let key = event.composite_key();
        Ok(branches.iter().any(|b| b == &event.branch) && events.iter().any(|e| e == &key))
    }

    /// onStart entries (validated non-empty by `matches`).
    pub fn on_start(&self) -> &[String] {
        self.on_start.as_deref().unwrap_or_default()
    }
}

/// Parse the contents of a `triggers.yaml` manifest.
pub fn parse_triggers(content: &str) -> Result<Vec<TriggerSpec>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml_ng::from_str(content)?)
}

/// Evaluate every trigger against `event`.
/// Fails with `NoMatch` when none of them fires.
pub fn match_triggers(event: &CanonicalEvent, triggers: &[TriggerSpec]) -> Result<Vec<(TriggerSpec, bool)>> {
    let mut results = Vec::with_capacity(triggers.len());
    for trigger in triggers {
        let matched = trigger.matches(event)?;
        if matched {
            info!(
                event = %event.event,
                repo = %event.repo,
                branch = %event.branch,
                config = %trigger.config,
                "trigger matched"
            );
        } else {
            debug!(key = %event.composite_key(), branch = %event.branch, "trigger did not match");
        }
        results.push((trigger.clone(), matched));
    }

    if !results.iter().any(|(_, matched)| *matched) {
        return Err(EngineError::NoMatch {
            event: event.event.clone(),
            action: event.action.clone(),
            branch: event.branch.clone(),
        });
    }
    Ok(results)
}

/// The triggers from `match_triggers` that fired, in declaration order.
pub fn fired(results: Vec<(TriggerSpec, bool)>) -> Vec<TriggerSpec> {
    results
        .into_iter()
        .filter_map(|(trigger, matched)| matched.then_some(trigger))
        .collect()
}

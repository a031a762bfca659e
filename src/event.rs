//! Provider-neutral event and webhook structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Normalized form of an inbound provider webhook.
/// Built once per delivery and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub event: String,
    pub action: String,
    pub repo: String,
    pub branch: String,
    pub dest_branch: String,
    pub commit: String,
    pub user: String,
    pub user_email: String,
    pub pull_request_title: String,
    pub pull_request_url: String,
    pub labels: Vec<String>,
    pub owner_id: i64,
}

impl CanonicalEvent {
    /// Create minimal event data (enough for trigger matching)
    pub fn minimal(event: &str, action: &str, repo: &str, branch: &str) -> Self {
        Self {
            event: event.to_string(),
            action: action.to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            ..Self::default()
        }
    }

    /// Key matched against `TriggerSpec::events`: `event` alone, or `event.action`.
    pub fn composite_key(&self) -> String {
        if self.action.is_empty() {
            self.event.clone()
        } else {
            format!("{}.{}", self.event, self.action)
        }
    }

    /// Rejects events whose owner is unset or differs from the configured organization.
    pub fn verify_owner(&self, org_id: i64) -> Result<()> {
        if self.owner_id == 0 || self.owner_id != org_id {
            return Err(EngineError::Spoofed {
                owner_id: self.owner_id,
            });
        }
        Ok(())
    }
}

/// Where a webhook is installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookScope {
    Organization,
    Repository(String),
}

impl HookScope {
    pub fn repo_name(&self) -> Option<&str> {
        match self {
            HookScope::Organization => None,
            HookScope::Repository(name) => Some(name),
        }
    }
}

/// A webhook known to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRecord {
    pub hook_id: i64,
    /// `None` for an organization-scope hook
    pub repo_name: Option<String>,
    pub healthy: bool,
    pub registered_at: DateTime<Utc>,
}

impl HookRecord {
    /// Freshly registered hooks start out healthy.
    pub fn new(hook_id: i64, scope: &HookScope) -> Self {
        Self {
            hook_id,
            repo_name: scope.repo_name().map(String::from),
            healthy: true,
            registered_at: Utc::now(),
        }
    }

    pub fn scope(&self) -> HookScope {
        match &self.repo_name {
            Some(name) => HookScope::Repository(name.clone()),
            None => HookScope::Organization,
        }
    }
}

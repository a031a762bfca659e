//! Process configuration, read from a TOML file.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EngineError, Result};
use crate::event::HookScope;
use crate::payload::ProviderKind;

pub const DEFAULT_CONFIG_PATH: &str = "hooktrigger.toml";
pub const DEFAULT_DIAGNOSIS_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default)]
    pub org_name: String,
    /// Identity every inbound event's owner must match.
    #[serde(default)]
    pub org_id: i64,
    #[serde(default)]
    pub org_level_webhook: bool,
    /// Either a TOML list or a comma separated string.
    #[serde(default, deserialize_with = "deserialize_repo_list")]
    pub repo_list: Vec<String>,
    #[serde(default)]
    pub webhook_url: String,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub webhook_auto_cleanup: bool,
    #[serde(default)]
    pub full_health_check: bool,
    #[serde(default = "default_diagnosis_timeout_secs")]
    pub diagnosis_timeout_secs: u64,
    /// Directory holding the repositories served by the local git provider.
    pub local_root: Option<PathBuf>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:2746".to_string(),
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to rolling files in this directory.
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub rotation: LogRotation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

fn default_provider() -> ProviderKind {
    ProviderKind::GitHub
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_diagnosis_timeout_secs() -> u64 {
    DEFAULT_DIAGNOSIS_TIMEOUT_SECS
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RepoList {
    Csv(String),
    List(Vec<String>),
}

fn deserialize_repo_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match RepoList::deserialize(deserializer)? {
        RepoList::Csv(csv) => csv.split(',').map(String::from).collect(),
        RepoList::List(list) => list,
    };
    Ok(raw
        .into_iter()
        .map(|repo| repo.trim().to_string())
        .filter(|repo| !repo.is_empty())
        .collect())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            org_name: String::new(),
            org_id: 0,
            org_level_webhook: false,
            repo_list: Vec::new(),
            webhook_url: String::new(),
            webhook_secret: None,
            webhook_auto_cleanup: false,
            full_health_check: false,
            diagnosis_timeout_secs: DEFAULT_DIAGNOSIS_TIMEOUT_SECS,
            local_root: None,
            orchestrator: OrchestratorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// The webhook targets this process owns.
    /// Organization scope and a repository list are mutually exclusive.
    pub fn webhook_scopes(&self) -> Result<Vec<HookScope>> {
        match (self.org_level_webhook, self.repo_list.is_empty()) {
            (true, false) => Err(EngineError::Config(
                "org level webhook wanted but provided repositories list".into(),
            )),
            (false, true) => Err(EngineError::Config(
                "either org level webhook or repos list must be provided".into(),
            )),
            (true, true) => Ok(vec![HookScope::Organization]),
            (false, false) => Ok(self
                .repo_list
                .iter()
                .map(|repo| HookScope::Repository(repo.clone()))
                .collect()),
        }
    }

    pub fn diagnosis_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.diagnosis_timeout_secs)
    }

    /// Non-empty webhook secret, if one is configured.
    pub fn secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        self.webhook_scopes()?;
        if self.diagnosis_timeout_secs == 0 {
            return Err(EngineError::Config(
                "diagnosis_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Load, parse and validate the configuration file
pub fn load_config(path: &str) -> Result<EngineConfig> {
    let config_str = fs::read_to_string(path).map_err(|e| {
        EngineError::Config(format!("Failed to read config file '{}': {}", path, e))
    })?;

    let config: EngineConfig = toml::from_str(&config_str).map_err(|e| {
        EngineError::Config(format!("Failed to parse config file '{}': {}", path, e))
    })?;

    config.validate()?;
    Ok(config)
}

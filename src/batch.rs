//! Batch assembly: turns fired triggers into execution-ready file bundles.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::event::CanonicalEvent;
use crate::provider::{CommitFile, GitProvider};
use crate::trigger::{TriggerSpec, fired, match_triggers, parse_triggers};

pub const WORKFLOWS_DIR: &str = ".workflows";
pub const TRIGGERS_FILE: &str = "triggers.yaml";
pub const PARAMETERS_FILE: &str = "parameters.yaml";

/// Resolved files for one fired trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowBatch {
    pub on_start: Vec<CommitFile>,
    pub on_exit: Vec<CommitFile>,
    pub templates: Vec<CommitFile>,
    /// `CommitFile::default()` when the repository has no parameters file
    pub parameters: CommitFile,
    pub config: String,
    pub payload: CanonicalEvent,
}

fn workflows_paths(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| format!("{}/{}", WORKFLOWS_DIR, name))
        .collect()
}

/// Returns true iff `file` is listed in `dir`.
/// Listing errors and empty listings count as absent.
pub async fn is_file_exists(provider: &dyn GitProvider, repo: &str, branch: &str, dir: &str, file: &str) -> bool {
    let files = match provider.list_files(repo, branch, dir).await {
        Ok(files) => files,
        Err(e) => {
            warn!(repo, branch, dir, error = %e, "error listing files");
            return false;
        }
    };
    if files.is_empty() {
        warn!(repo, branch, dir, "empty list of files");
        return false;
    }
    files.iter().any(|f| f == file)
}

/// Per-event entry point: loads the repository's triggers, matches and
/// assembles a batch for every trigger that fired.
#[derive(Clone)]
pub struct WebhookHandler {
    provider: Arc<dyn GitProvider>,
}

impl WebhookHandler {
    pub fn new(provider: Arc<dyn GitProvider>) -> Self {
        Self { provider }
    }

    /// Load `.workflows/triggers.yaml` from the event's repository and branch.
    pub async fn register_triggers(&self, event: &CanonicalEvent) -> Result<Vec<TriggerSpec>> {
        let provider = self.provider.as_ref();
        if !is_file_exists(provider, &event.repo, &event.branch, "", WORKFLOWS_DIR).await {
            return Err(EngineError::NotFound(format!(
                "{} folder does not exist in {}/{}",
                WORKFLOWS_DIR, event.repo, event.branch
            )));
        }
        if !is_file_exists(provider, &event.repo, &event.branch, WORKFLOWS_DIR, TRIGGERS_FILE).await {
            return Err(EngineError::NotFound(format!(
                "{}/{} file does not exist in {}/{}",
                WORKFLOWS_DIR, TRIGGERS_FILE, event.repo, event.branch
            )));
        }

        let manifest_path = format!("{}/{}", WORKFLOWS_DIR, TRIGGERS_FILE);
        let manifest = provider
            .fetch_file(&event.repo, &event.branch, &manifest_path)
            .await?;
        let content = manifest.content.ok_or_else(|| {
            EngineError::NotFound(format!(
                "{} could not be read from {}/{}",
                manifest_path, event.repo, event.branch
            ))
        })?;
        debug!(repo = %event.repo, branch = %event.branch, "triggers content:\n{}", content);

        let triggers = parse_triggers(&content)?;
        info!(
            repo = %event.repo,
            branch = %event.branch,
            count = triggers.len(),
            "registered triggers"
        );
        Ok(triggers)
    }

    /// Resolve all files a fired trigger needs.
    pub async fn assemble(&self, event: &CanonicalEvent, trigger: &TriggerSpec) -> Result<WorkflowBatch> {
        let provider = self.provider.as_ref();

        let on_start = provider
            .fetch_files(&event.repo, &event.branch, &workflows_paths(trigger.on_start()))
            .await?;
        if on_start.is_empty() {
            return Err(EngineError::NotFound(format!(
                "none of onStart: {:?} files found in repo: {} branch: {}",
                trigger.on_start(),
                event.repo,
                event.branch
            )));
        }

        let on_exit = self.resolve_optional(event, "onExit", trigger.on_exit.as_deref()).await?;
        let templates = self
            .resolve_optional(event, "templates", trigger.templates.as_deref())
            .await?;

        let parameters = if is_file_exists(provider, &event.repo, &event.branch, WORKFLOWS_DIR, PARAMETERS_FILE).await {
            provider
                .fetch_file(
                    &event.repo,
                    &event.branch,
                    &format!("{}/{}", WORKFLOWS_DIR, PARAMETERS_FILE),
                )
                .await?
        } else {
            info!(repo = %event.repo, branch = %event.branch, "{} not found", PARAMETERS_FILE);
            CommitFile::default()
        };

        Ok(WorkflowBatch {
            on_start,
            on_exit,
            templates,
            parameters,
            config: trigger.config.clone(),
            payload: event.clone(),
        })
    }

    /// Optional stages degrade to an empty list.
    async fn resolve_optional(&self, event: &CanonicalEvent, stage: &str, names: Option<&[String]>) -> Result<Vec<CommitFile>> {
        let Some(names) = names else {
            return Ok(Vec::new());
        };
        let files = self
            .provider
            .fetch_files(&event.repo, &event.branch, &workflows_paths(names))
            .await?;
        if files.is_empty() {
            warn!(
                stage,
                files = ?names,
                repo = %event.repo,
                branch = %event.branch,
                "no files found for optional stage"
            );
        }
        Ok(files)
    }

    /// Load triggers, match the event and assemble one batch per fired trigger.
    pub async fn handle_webhook(&self, event: &CanonicalEvent) -> Result<Vec<WorkflowBatch>> {
        let triggers = self.register_triggers(event).await?;
        let matched = fired(match_triggers(event, &triggers)?);

        let mut batches = Vec::with_capacity(matched.len());
        for trigger in &matched {
            batches.push(self.assemble(event, trigger).await?);
        }

        if batches.is_empty() {
            warn!(repo = %event.repo, branch = %event.branch, "no workflows to execute");
            return Err(EngineError::NoWorkflows {
                repo: event.repo.clone(),
                branch: event.branch.clone(),
            });
        }
        Ok(batches)
    }
}

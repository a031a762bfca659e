//! Commit status notifications for workflow runs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{EngineError, Result};
use crate::provider::{CommitStatus, GitProvider, RunEventSource};

pub const REPO_LABEL: &str = "repo";
pub const COMMIT_LABEL: &str = "commit";
/// Runs must carry this label to get their status reported.
pub const NOTIFIED_LABEL: &str = "hooktrigger/notified";
pub const MAX_MESSAGE_CHARS: usize = 140;

/// Lifecycle phase reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
    Unknown(String),
}

impl FromStr for RunPhase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "Pending" => RunPhase::Pending,
            "Running" => RunPhase::Running,
            "Succeeded" => RunPhase::Succeeded,
            "Failed" => RunPhase::Failed,
            "Error" => RunPhase::Error,
            other => RunPhase::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Pending => f.write_str("Pending"),
            RunPhase::Running => f.write_str("Running"),
            RunPhase::Succeeded => f.write_str("Succeeded"),
            RunPhase::Failed => f.write_str("Failed"),
            RunPhase::Error => f.write_str("Error"),
            RunPhase::Unknown(other) => f.write_str(other),
        }
    }
}

/// A status change of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_name: String,
    pub phase: RunPhase,
    pub message: String,
    pub labels: BTreeMap<String, String>,
}

impl RunEvent {
    fn label(&self, name: &str) -> Result<&str> {
        self.labels
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| EngineError::MissingLabel {
                run: self.run_name.clone(),
                label: name.to_string(),
            })
    }
}

fn truncate_chars(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}

pub struct StatusNotifier {
    provider: Arc<dyn GitProvider>,
    orchestrator: OrchestratorConfig,
}

impl StatusNotifier {
    pub fn new(provider: Arc<dyn GitProvider>, orchestrator: OrchestratorConfig) -> Self {
        Self {
            provider,
            orchestrator,
        }
    }

    /// Orchestrator UI link for a run.
    pub fn run_link(&self, run_name: &str) -> Result<String> {
        let base = self.orchestrator.url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(EngineError::Config(format!(
                "orchestrator url '{}' is not an http(s) url",
                self.orchestrator.url
            )));
        }
        Ok(format!(
            "{}/workflows/{}/{}",
            base, self.orchestrator.namespace, run_name
        ))
    }

    /// Report `run` as a commit status on the commit that started it.
    pub async fn notify(&self, run: &RunEvent) -> Result<()> {
        let repo = run.label(REPO_LABEL)?;
        let commit = run.label(COMMIT_LABEL)?;
        let state = self
            .provider
            .translate_phase(&run.phase)
            .ok_or_else(|| EngineError::UnmappedPhase(run.phase.to_string()))?;

        let status = CommitStatus {
            repo: repo.to_string(),
            commit: commit.to_string(),
            link_url: self.run_link(&run.run_name)?,
            state,
            message: truncate_chars(&run.message, MAX_MESSAGE_CHARS),
        };
        self.provider.set_commit_status(&status).await?;
        info!(
            run = %run.run_name,
            repo,
            commit,
            state = %state,
            "commit status updated"
        );
        Ok(())
    }
}

/// Consume run events until `token` is cancelled or the stream ends.
/// A closed stream cancels `token`: the source cannot be restarted.
pub async fn watch_runs(
    source: Arc<dyn RunEventSource>,
    notifier: Arc<StatusNotifier>,
    token: CancellationToken,
) -> Result<()> {
    let mut events = source.watch()?;
    info!("watching workflow runs");

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("run watcher cancelled");
                break;
            }
            next = events.next() => {
                let Some(run) = next else {
                    error!("run event stream closed");
                    token.cancel();
                    break;
                };
                if !run.labels.contains_key(NOTIFIED_LABEL) {
                    debug!(run = %run.run_name, "run not marked for notification, skipping");
                    continue;
                }
                if let Err(e) = notifier.notify(&run).await {
                    warn!(run = %run.run_name, phase = %run.phase, error = %e, "failed to notify run status");
                }
            }
        }
    }
    Ok(())
}

//! Capability traits the engine consumes from a code-hosting provider and
//! from the workflow orchestrator.
//!
//! The engine only ever talks to these traits. Each provider backend
//! (GitHub, GitLab, the local git adapter) implements `GitProvider` once.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tracing::debug;

use crate::error::Result;
use crate::event::{HookRecord, HookScope};
use crate::notifier::{RunEvent, RunPhase};
use crate::payload::{InboundPayload, ProviderKind, parse_payload};

/// A file read from a repository at a given branch.
/// Both fields unset means the file was not found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFile {
    pub path: Option<String>,
    pub content: Option<String>,
}

impl CommitFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            content: Some(content.into()),
        }
    }

    pub fn is_found(&self) -> bool {
        self.path.is_some() || self.content.is_some()
    }
}

/// Commit status vocabulary shared by all providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Error,
    Failure,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Success => "success",
            CommitState::Error => "error",
            CommitState::Failure => "failure",
        }
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status update for a single commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitStatus {
    pub repo: String,
    pub commit: String,
    pub link_url: String,
    pub state: CommitState,
    pub message: String,
}

/// Standard run phase to commit status mapping.
pub fn default_phase_status(phase: &RunPhase) -> Option<CommitState> {
    match phase {
        RunPhase::Pending | RunPhase::Running => Some(CommitState::Pending),
        RunPhase::Succeeded => Some(CommitState::Success),
        RunPhase::Failed => Some(CommitState::Failure),
        RunPhase::Error => Some(CommitState::Error),
        RunPhase::Unknown(_) => None,
    }
}

#[async_trait]
pub trait GitProvider: Send + Sync {
    /// Which payload dialect this provider delivers.
    fn kind(&self) -> ProviderKind;

    /// Fetch a single file. Returns `CommitFile::default()` when it does not exist.
    async fn fetch_file(&self, repo: &str, branch: &str, path: &str) -> Result<CommitFile>;

    /// Fetch several files, skipping the ones that do not exist.
    async fn fetch_files(&self, repo: &str, branch: &str, paths: &[String]) -> Result<Vec<CommitFile>> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file = self.fetch_file(repo, branch, path).await?;
            if !file.is_found() {
                debug!(repo, branch, path = %path, "file not found");
                continue;
            }
            files.push(file);
        }
        Ok(files)
    }

    /// List the entry names of a directory (empty `dir` is the repository root).
    async fn list_files(&self, repo: &str, branch: &str, dir: &str) -> Result<Vec<String>>;

    /// Create the webhook for `scope`, or update the one already pointing at us.
    async fn create_or_update_webhook(&self, scope: &HookScope) -> Result<HookRecord>;

    async fn delete_webhook(&self, hook: &HookRecord) -> Result<()>;

    /// Ask the provider to deliver a ping to the hook. Success only means the
    /// request was accepted; health is reported back through the registry.
    async fn ping_webhook(&self, hook: &HookRecord) -> Result<()>;

    fn translate_phase(&self, phase: &RunPhase) -> Option<CommitState> {
        default_phase_status(phase)
    }

    async fn set_commit_status(&self, status: &CommitStatus) -> Result<()>;

    /// Normalize an inbound delivery into a canonical payload.
    fn handle_payload(&self, headers: &HeaderMap, body: &[u8]) -> Result<InboundPayload> {
        parse_payload(self.kind(), headers, body)
    }
}

pub type RunEventStream = Pin<Box<dyn Stream<Item = RunEvent> + Send>>;

/// The orchestrator's stream of run status changes.
/// The stream is infinite and cannot be restarted once it closes.
pub trait RunEventSource: Send + Sync {
    fn watch(&self) -> Result<RunEventStream>;
}

//! `GitProvider` backed by git repositories on the local filesystem.
//!
//! Repository `r` lives at `<root>/r`. Files are read straight from the
//! branch with `git show`, so the working tree does not need to be checked
//! out. Webhooks only exist in memory; a ping is answered immediately
//! through the configured ping sink.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::event::{HookRecord, HookScope};
use crate::payload::ProviderKind;
use crate::provider::{CommitFile, CommitStatus, GitProvider};

const FIRST_HOOK_ID: i64 = 1;

/// A saved webhook and the URL deliveries are sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalHook {
    scope: HookScope,
    target_url: String,
}

pub struct LocalGitProvider {
    root: PathBuf,
    kind: ProviderKind,
    webhook_url: String,
    hooks: Mutex<BTreeMap<i64, LocalHook>>,
    next_hook_id: AtomicI64,
    ping_sink: Mutex<Option<mpsc::UnboundedSender<i64>>>,
    statuses: Mutex<Vec<CommitStatus>>,
}

impl LocalGitProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            kind: ProviderKind::GitHub,
            webhook_url: String::new(),
            hooks: Mutex::new(BTreeMap::new()),
            next_hook_id: AtomicI64::new(FIRST_HOOK_ID),
            ping_sink: Mutex::new(None),
            statuses: Mutex::new(Vec::new()),
        }
    }

    /// Payload dialect used for inbound deliveries.
    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Delivery URL recorded on every webhook saved from now on.
    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = url.into();
        self
    }

    /// Delivery URL of a saved webhook.
    pub fn hook_target(&self, hook_id: i64) -> Option<String> {
        self.hooks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&hook_id)
            .map(|hook| hook.target_url.clone())
    }

    /// Where accepted pings are delivered, usually a registry ping listener.
    pub fn set_ping_sink(&self, sink: mpsc::UnboundedSender<i64>) {
        *self.ping_sink.lock().unwrap_or_else(|p| p.into_inner()) = Some(sink);
    }

    /// Commit statuses reported so far.
    pub fn statuses(&self) -> Vec<CommitStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn repo_path(&self, repo: &str) -> PathBuf {
        self.root.join(repo)
    }

    async fn git(&self, repo: &str, args: &[&str]) -> Result<std::process::Output> {
        let repo_path = self.repo_path(repo);
        debug!("Running (cwd = '{}'): git {}", repo_path.display(), args.join(" "));
        Command::new("git")
            .current_dir(&repo_path)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                EngineError::Transport(format!(
                    "git {} failed to start in '{}': {}",
                    args.first().unwrap_or(&""),
                    repo_path.display(),
                    e
                ))
            })
    }
}

#[async_trait]
impl GitProvider for LocalGitProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn fetch_file(&self, repo: &str, branch: &str, path: &str) -> Result<CommitFile> {
        let object = format!("{}:{}", branch, path);
        let output = self.git(repo, &["show", &object]).await?;
        if !output.status.success() {
            debug!(
                repo,
                object = %object,
                "git show failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(CommitFile::default());
        }
        let content = String::from_utf8(output.stdout)
            .map_err(|e| EngineError::Transport(format!("{} is not valid UTF-8: {}", object, e)))?;
        Ok(CommitFile::new(path, content))
    }

    async fn list_files(&self, repo: &str, branch: &str, dir: &str) -> Result<Vec<String>> {
        let dir = dir.trim_end_matches('/');
        let prefix = format!("{}/", dir);
        let mut args = vec!["ls-tree", "--name-only", branch];
        if !dir.is_empty() {
            args.push(&prefix);
        }

        let output = self.git(repo, &args).await?;
        if !output.status.success() {
            return Err(EngineError::Transport(format!(
                "git ls-tree failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| {
                if dir.is_empty() {
                    line
                } else {
                    line.strip_prefix(&prefix).unwrap_or(line)
                }
            })
            .map(String::from)
            .collect())
    }

    async fn create_or_update_webhook(&self, scope: &HookScope) -> Result<HookRecord> {
        let mut hooks = self.hooks.lock().unwrap_or_else(|p| p.into_inner());
        let existing = hooks
            .iter()
            .find(|(_, hook)| hook.scope == *scope)
            .map(|(id, _)| *id);
        let hook_id =
            existing.unwrap_or_else(|| self.next_hook_id.fetch_add(1, Ordering::SeqCst));
        hooks.insert(
            hook_id,
            LocalHook {
                scope: scope.clone(),
                target_url: self.webhook_url.clone(),
            },
        );
        info!(
            hook_id,
            scope = ?scope,
            url = %self.webhook_url,
            updated = existing.is_some(),
            "local webhook saved"
        );
        Ok(HookRecord::new(hook_id, scope))
    }

    async fn delete_webhook(&self, hook: &HookRecord) -> Result<()> {
        self.hooks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&hook.hook_id)
            .map(|_| ())
            .ok_or(EngineError::HookNotFound(hook.hook_id))
    }

    async fn ping_webhook(&self, hook: &HookRecord) -> Result<()> {
        if !self
            .hooks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&hook.hook_id)
        {
            return Err(EngineError::HookNotFound(hook.hook_id));
        }
        if let Some(sink) = self
            .ping_sink
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
        {
            let _ = sink.send(hook.hook_id);
        }
        Ok(())
    }

    async fn set_commit_status(&self, status: &CommitStatus) -> Result<()> {
        info!(
            repo = %status.repo,
            commit = %status.commit,
            state = %status.state,
            link = %status.link_url,
            "{}",
            status.message
        );
        self.statuses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(status.clone());
        Ok(())
    }
}

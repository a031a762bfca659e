//! In-memory `GitProvider` used by the unit tests.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{EngineError, Result};
use crate::event::{HookRecord, HookScope};
use crate::payload::ProviderKind;
use crate::provider::{CommitFile, CommitStatus, GitProvider};

#[derive(Default)]
pub struct MockProvider {
    /// `repo/branch/path` -> content
    files: Mutex<HashMap<String, String>>,
    pub fail_listing: AtomicBool,
    pub fail_fetch: AtomicBool,
    next_hook_id: AtomicI64,
    pub created: Mutex<Vec<HookScope>>,
    pub deleted: Mutex<Vec<i64>>,
    pub pinged: Mutex<Vec<i64>>,
    pub fail_create: AtomicBool,
    /// Repositories whose webhook creation fails.
    pub fail_create_repo: Mutex<HashSet<String>>,
    pub fail_delete: Mutex<HashSet<i64>>,
    pub fail_ping: Mutex<HashSet<i64>>,
    /// Hooks whose ping is accepted but never answered.
    pub silent: Mutex<HashSet<i64>>,
    ping_sink: Mutex<Option<mpsc::UnboundedSender<i64>>>,
    pub statuses: Mutex<Vec<CommitStatus>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            next_hook_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub fn with_file(self, repo: &str, branch: &str, path: &str, content: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(format!("{}/{}/{}", repo, branch, path), content.to_string());
        self
    }

    pub fn set_ping_sink(&self, sink: mpsc::UnboundedSender<i64>) {
        *self.ping_sink.lock().unwrap() = Some(sink);
    }
}

#[async_trait]
impl GitProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn fetch_file(&self, repo: &str, branch: &str, path: &str) -> Result<CommitFile> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(EngineError::Transport("fetch failed".into()));
        }
        let key = format!("{}/{}/{}", repo, branch, path);
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(&key)
            .map(|content| CommitFile::new(path, content.clone()))
            .unwrap_or_default())
    }

    async fn list_files(&self, repo: &str, branch: &str, dir: &str) -> Result<Vec<String>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(EngineError::Transport("listing failed".into()));
        }
        let prefix = if dir.is_empty() {
            format!("{}/{}/", repo, branch)
        } else {
            format!("{}/{}/{}/", repo, branch, dir)
        };
        let names: BTreeSet<String> = self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(String::from)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn create_or_update_webhook(&self, scope: &HookScope) -> Result<HookRecord> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::Transport("create failed".into()));
        }
        if let Some(repo) = scope.repo_name() {
            if self.fail_create_repo.lock().unwrap().contains(repo) {
                return Err(EngineError::Transport(format!("create for {} failed", repo)));
            }
        }
        self.created.lock().unwrap().push(scope.clone());
        let id = self.next_hook_id.fetch_add(1, Ordering::SeqCst);
        Ok(HookRecord::new(id, scope))
    }

    async fn delete_webhook(&self, hook: &HookRecord) -> Result<()> {
        if self.fail_delete.lock().unwrap().contains(&hook.hook_id) {
            return Err(EngineError::Transport(format!("delete of {} failed", hook.hook_id)));
        }
        self.deleted.lock().unwrap().push(hook.hook_id);
        Ok(())
    }

    async fn ping_webhook(&self, hook: &HookRecord) -> Result<()> {
        if self.fail_ping.lock().unwrap().contains(&hook.hook_id) {
            return Err(EngineError::Transport(format!("ping of {} failed", hook.hook_id)));
        }
        self.pinged.lock().unwrap().push(hook.hook_id);
        if self.silent.lock().unwrap().contains(&hook.hook_id) {
            return Ok(());
        }
        if let Some(sink) = self.ping_sink.lock().unwrap().as_ref() {
            let _ = sink.send(hook.hook_id);
        }
        Ok(())
    }

    async fn set_commit_status(&self, status: &CommitStatus) -> Result<()> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}

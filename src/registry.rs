//! Webhook registry and reconciler.
//!
//! Owns the set of webhooks this process registered with the provider,
//! checks their health with ping round trips and repairs broken ones.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::event::HookRecord;
use crate::provider::GitProvider;

pub const DIAGNOSIS_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct WebhookRegistry {
    provider: Arc<dyn GitProvider>,
    hooks: Mutex<BTreeMap<i64, HookRecord>>,
}

impl WebhookRegistry {
    pub fn new(provider: Arc<dyn GitProvider>) -> Self {
        Self {
            provider,
            hooks: Mutex::new(BTreeMap::new()),
        }
    }

    // The map is always left consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<i64, HookRecord>> {
        self.hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, record: HookRecord) {
        self.lock().insert(record.hook_id, record);
    }

    pub fn get(&self, hook_id: i64) -> Option<HookRecord> {
        self.lock().get(&hook_id).cloned()
    }

    pub fn delete(&self, hook_id: i64) -> Option<HookRecord> {
        self.lock().remove(&hook_id)
    }

    pub fn set_all_health(&self, healthy: bool) {
        for record in self.lock().values_mut() {
            record.healthy = healthy;
        }
    }

    /// Health callback, invoked when a ping delivery arrives for `hook_id`.
    pub fn set_webhook_health(&self, hook_id: i64, healthy: bool) -> Result<()> {
        let mut hooks = self.lock();
        let record = hooks
            .get_mut(&hook_id)
            .ok_or(EngineError::HookNotFound(hook_id))?;
        record.healthy = healthy;
        debug!(hook_id, healthy, "webhook health updated");
        Ok(())
    }

    /// Snapshot of all records, ordered by hook id.
    pub fn hooks(&self) -> Vec<HookRecord> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn all_healthy(&self) -> bool {
        self.lock().values().all(|record| record.healthy)
    }

    /// Lowest id among the unhealthy hooks.
    pub fn first_unhealthy(&self) -> Option<i64> {
        self.lock()
            .values()
            .find(|record| !record.healthy)
            .map(|record| record.hook_id)
    }

    /// Register a webhook for every configured target.
    pub async fn init_webhooks(&self, config: &EngineConfig) -> Result<()> {
        let scopes = config.webhook_scopes()?;
        for scope in &scopes {
            let record = self.provider.create_or_update_webhook(scope).await?;
            info!(hook_id = record.hook_id, scope = ?scope, "webhook registered");
            self.set(record);
        }
        info!(count = scopes.len(), org = %config.org_name, "webhooks initialized");
        Ok(())
    }

    /// Ping every hook and wait for all of them to report back healthy.
    pub async fn run_diagnosis(&self, timeout: Duration) -> Result<()> {
        self.set_all_health(false);

        for record in self.hooks() {
            debug!(hook_id = record.hook_id, "pinging webhook");
            self.provider.ping_webhook(&record).await.map_err(|e| {
                error!(hook_id = record.hook_id, error = %e, "webhook ping failed");
                e
            })?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.all_healthy() {
                info!(count = self.len(), "all webhooks healthy");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(DIAGNOSIS_POLL_INTERVAL).await;
        }

        match self.first_unhealthy() {
            Some(hook_id) => {
                warn!(hook_id, timeout = ?timeout, "webhook did not answer ping");
                Err(EngineError::Unhealthy { hook_id })
            }
            None => Ok(()),
        }
    }

    /// Replace a hook by a freshly created one for the same scope.
    pub async fn recover_hook(&self, hook_id: i64) -> Result<HookRecord> {
        let old = self.get(hook_id).ok_or(EngineError::HookNotFound(hook_id))?;
        let scope = old.scope();

        let new = self.provider.create_or_update_webhook(&scope).await?;
        self.delete(hook_id);
        self.set(new.clone());
        info!(old_id = hook_id, new_id = new.hook_id, scope = ?scope, "webhook recovered");
        Ok(new)
    }

    /// Recover every unhealthy hook. Returns `(old_id, new_id)` pairs.
    pub async fn recover_unhealthy(&self) -> Result<Vec<(i64, i64)>> {
        let unhealthy: Vec<i64> = self
            .hooks()
            .into_iter()
            .filter(|record| !record.healthy)
            .map(|record| record.hook_id)
            .collect();

        let mut replaced = Vec::with_capacity(unhealthy.len());
        for hook_id in unhealthy {
            let new = self.recover_hook(hook_id).await?;
            replaced.push((hook_id, new.hook_id));
        }
        Ok(replaced)
    }

    /// Delete every hook from the provider when `auto_cleanup` is set.
    /// Failed deletions stay registered and are returned.
    pub async fn teardown(&self, auto_cleanup: bool) -> Vec<(i64, EngineError)> {
        if !auto_cleanup {
            info!("webhook auto cleanup disabled, leaving hooks in place");
            return Vec::new();
        }

        let mut failures = Vec::new();
        for record in self.hooks() {
            match self.provider.delete_webhook(&record).await {
                Ok(()) => {
                    self.delete(record.hook_id);
                    info!(hook_id = record.hook_id, "webhook deleted");
                }
                Err(e) => {
                    error!(hook_id = record.hook_id, error = %e, "failed to delete webhook");
                    failures.push((record.hook_id, e));
                }
            }
        }
        failures
    }

    /// Feed ping deliveries from `rx` into the health callback until the channel closes.
    pub fn spawn_ping_listener(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<i64>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(hook_id) = rx.recv().await {
                if let Err(e) = registry.set_webhook_health(hook_id, true) {
                    warn!(hook_id, error = %e, "ping for unknown webhook");
                }
            }
            debug!("ping listener stopped");
        })
    }
}

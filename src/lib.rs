pub mod batch;
pub mod config;
pub mod error;
pub mod event;
pub mod local;
pub mod logging;
pub mod notifier;
pub mod payload;
pub mod provider;
pub mod registry;
pub mod signature;
pub mod trigger;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::http::HeaderMap;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

pub use batch::{WebhookHandler, WorkflowBatch};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use event::{CanonicalEvent, HookRecord, HookScope};
pub use notifier::StatusNotifier;
pub use payload::{InboundPayload, ProviderKind};
pub use provider::{GitProvider, RunEventSource};
pub use registry::WebhookRegistry;

/// Outcome of one inbound webhook delivery.
#[derive(Debug)]
pub enum Dispatch {
    /// A ping came back; the hook is now marked healthy.
    Ping { hook_id: i64 },
    Batches(Vec<WorkflowBatch>),
}

/// Wires the handler, registry and notifier around a single provider.
pub struct Engine {
    config: EngineConfig,
    provider: Arc<dyn GitProvider>,
    registry: Arc<WebhookRegistry>,
    handler: WebhookHandler,
}

impl Engine {
    pub fn new(config: EngineConfig, provider: Arc<dyn GitProvider>) -> Self {
        Self {
            registry: Arc::new(WebhookRegistry::new(provider.clone())),
            handler: WebhookHandler::new(provider.clone()),
            config,
            provider,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WebhookRegistry> {
        &self.registry
    }

    pub fn notifier(&self) -> StatusNotifier {
        StatusNotifier::new(self.provider.clone(), self.config.orchestrator.clone())
    }

    /// One full health check: register the configured webhooks, ping them and,
    /// with `full_health_check`, repair the unhealthy ones and check again.
    /// Teardown always runs, so hooks are cleaned up even when a step fails.
    pub async fn run_health_check(&self) -> Result<()> {
        let result = self.diagnose().await;
        if let Err(e) = &result {
            warn!(error = %e, "health check failed");
        }
        for (hook_id, e) in self.registry.teardown(self.config.webhook_auto_cleanup).await {
            warn!(hook_id, error = %e, "webhook left behind");
        }
        result
    }

    async fn diagnose(&self) -> Result<()> {
        let timeout = self.config.diagnosis_timeout();
        self.registry.init_webhooks(&self.config).await?;
        let diagnosis = self.registry.run_diagnosis(timeout).await;
        if diagnosis.is_ok() || !self.config.full_health_check {
            return diagnosis;
        }
        if let Err(e) = &diagnosis {
            warn!(error = %e, "diagnosis failed, recovering unhealthy webhooks");
        }
        for (old, new) in self.registry.recover_unhealthy().await? {
            info!(old_id = old, new_id = new, "webhook replaced");
        }
        self.registry.run_diagnosis(timeout).await
    }

    /// Handle a raw webhook delivery: verify, normalize, then either record a
    /// ping or run the event through trigger matching and batch assembly.
    pub async fn handle_inbound(&self, headers: &HeaderMap, body: &[u8]) -> Result<Dispatch> {
        let delivery_id = Uuid::now_v7();
        let span = info_span!("delivery", id = %delivery_id, provider = %self.provider.kind());
        async move {
            if let Some(secret) = self.config.secret() {
                signature::verify_signature(self.provider.kind(), secret, headers, body)?;
            }

            let payload = self.provider.handle_payload(headers, body)?;
            self.dispatch(payload).await
        }
        .instrument(span)
        .await
    }

    /// Route an already verified and normalized payload.
    pub async fn dispatch(&self, payload: InboundPayload) -> Result<Dispatch> {
        match payload {
            InboundPayload::Ping { hook_id } => {
                self.registry.set_webhook_health(hook_id, true)?;
                info!(hook_id, "ping received");
                Ok(Dispatch::Ping { hook_id })
            }
            InboundPayload::Event(event) => {
                if let Err(e) = event.verify_owner(self.config.org_id) {
                    warn!(repo = %event.repo, error = %e, "rejecting webhook");
                    return Err(e);
                }
                info!(
                    event = %event.composite_key(),
                    repo = %event.repo,
                    branch = %event.branch,
                    "webhook received"
                );
                let batches = self.handler.handle_webhook(&event).await?;
                info!(count = batches.len(), "workflow batches assembled");
                Ok(Dispatch::Batches(batches))
            }
        }
    }
}

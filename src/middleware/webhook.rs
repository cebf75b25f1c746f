use crate::config::model::WebhookConfig;
use crate::core::execution::Execution;
use crate::middleware::{Chain, Middleware, SinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Shared name → webhook registry. Resolved at delivery time so registry
/// updates reach jobs without a structural replace.
pub type WebhookRegistry = Arc<Mutex<BTreeMap<String, WebhookConfig>>>;

pub fn new_registry() -> WebhookRegistry {
    Arc::new(Mutex::new(BTreeMap::new()))
}

/// Fans the execution record out to the named webhooks, each applying
/// its own trigger policy.
pub struct WebhookSink {
    names: Vec<String>,
    registry: WebhookRegistry,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(names: Vec<String>, registry: WebhookRegistry) -> Self {
        WebhookSink { names, registry, client: reqwest::Client::new() }
    }

    async fn deliver_one(&self, webhook: &WebhookConfig, exec: &Execution) -> Result<(), SinkError> {
        let endpoint = webhook
            .endpoint()
            .map_err(|reason| SinkError::Webhook(webhook.name.clone(), reason))?;
        let response = self
            .client
            .post(endpoint)
            .json(exec)
            .send()
            .await
            .map_err(|e| SinkError::Webhook(webhook.name.clone(), e.to_string()))?;
        if !response.status().is_success() {
            return Err(SinkError::Webhook(
                webhook.name.clone(),
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Middleware for WebhookSink {
    fn tag(&self) -> &'static str {
        "webhook"
    }

    async fn call(&self, exec: &mut Execution, chain: Chain<'_>) {
        chain.next(exec).await;

        for name in &self.names {
            let webhook = { self.registry.lock().get(name).cloned() };
            let Some(webhook) = webhook else {
                warn!(job = %exec.job, webhook = %name, "webhook is not defined");
                continue;
            };
            if !webhook.trigger.fires_for(exec.outcome.is_error()) {
                continue;
            }
            if let Err(err) = self.deliver_one(&webhook, exec).await {
                warn!(job = %exec.job, error = %err, "webhook delivery failed");
            }
        }
    }
}

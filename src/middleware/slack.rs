use crate::config::model::SlackBlock;
use crate::core::execution::Execution;
use crate::middleware::{Chain, Middleware, SinkError, should_deliver, summary_line};
use async_trait::async_trait;
use tracing::warn;

/// Chat-hook sink: posts a one-line summary to the configured incoming
/// webhook.
pub struct SlackSink {
    config: SlackBlock,
    client: reqwest::Client,
}

impl SlackSink {
    pub fn new(config: SlackBlock) -> Self {
        SlackSink { config, client: reqwest::Client::new() }
    }

    async fn deliver(&self, exec: &Execution) -> Result<(), SinkError> {
        let url = self
            .config
            .webhook
            .as_deref()
            .ok_or_else(|| SinkError::Slack("slack-webhook not set".to_string()))?;
        let payload = serde_json::json!({ "text": summary_line(exec) });
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Slack(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SinkError::Slack(format!("status {}", response.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl Middleware for SlackSink {
    fn tag(&self) -> &'static str {
        "slack"
    }

    async fn call(&self, exec: &mut Execution, chain: Chain<'_>) {
        chain.next(exec).await;
        if should_deliver(self.config.only_on_error, exec)
            && let Err(err) = self.deliver(exec).await
        {
            warn!(job = %exec.job, error = %err, "slack notification failed");
        }
    }
}

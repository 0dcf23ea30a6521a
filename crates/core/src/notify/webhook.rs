//! Webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::WebhookConfig;

use super::{Notifier, NotifyError, Receipt};

/// POSTs receipts as JSON to a configured URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn requires_name_info(&self) -> bool {
        true
    }

    async fn notify(&self, receipt: &Receipt) -> Result<(), NotifyError> {
        if receipt.origin_id.is_none() {
            return Err(NotifyError::MissingNameInfo(self.name().to_string()));
        }

        let response = self
            .client
            .post(&self.url)
            .json(receipt)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        debug!(job_id = receipt.job_id, url = %self.url, "Receipt delivered");
        Ok(())
    }
}

//! Built-in `webhook` notifier: `POST`s each event as JSON.

use std::time::Duration;

use tracing::debug;

use super::{Notifier, PluginFuture};
use crate::models::event::OrchestratorEvent;
use crate::{AppError, Result};

/// Registry name.
pub const NAME: &str = "webhook";

/// HTTP webhook notifier.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Notifier posting to `url`, each request bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Notifier` if the HTTP client cannot be built.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Notifier(format!("failed to build http client: {err}")))?;
        Ok(Self { url, client })
    }

    async fn post(&self, event: &OrchestratorEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|err| AppError::Notifier(format!("webhook request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Notifier(format!(
                "webhook returned {status} for {}",
                event.event_type
            )));
        }
        debug!(event_id = event.id, %status, "webhook delivered");
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        NAME
    }

    fn notify<'a>(&'a self, event: &'a OrchestratorEvent) -> PluginFuture<'a, ()> {
        Box::pin(self.post(event))
    }
}

//! Concrete notification sinks. A runnable agent needs at least one real
//! sink to demonstrate fan-out against, so two are provided in-tree.

use super::NotificationEvent;
use async_trait::async_trait;
use tracing::{error, info, warn};

/// Sinks register against the Manager; delivery failures are logged but
/// never surface to the caller.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), String>;
}

/// Emits events through `tracing` at a level derived from severity. The
/// simplest possible sink, useful as a default and in tests.
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), String> {
        use super::NotificationSeverity as Sev;
        match event.severity {
            Sev::Info => info!(kind = ?event.kind, instance = ?event.instance_id, "{}", event.message),
            Sev::Warning => warn!(kind = ?event.kind, instance = ?event.instance_id, "{}", event.message),
            Sev::Error | Sev::Critical => {
                error!(kind = ?event.kind, instance = ?event.instance_id, "{}", event.message)
            }
        }
        Ok(())
    }
}

/// Fire-and-forget HTTP POST of the event as JSON. Not a retrying client:
/// sinks are expected to be idempotent consumers that may see duplicates
/// from retry elsewhere, not a mandate that every sink retry itself.
pub struct WebhookSink {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), String> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| format!("webhook POST to {} failed: {e}", self.url))?
            .error_for_status()
            .map_err(|e| format!("webhook {} returned error status: {e}", self.url))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{NotificationKind, NotificationSeverity};

    #[tokio::test]
    async fn log_sink_never_fails() {
        let sink = LogSink::new("test");
        let event = NotificationEvent::new(NotificationKind::Idle, NotificationSeverity::Info, "hello");
        sink.deliver(&event).await.unwrap();
    }
}

//! Notification pipeline: asynchronous, non-blocking fan-out of
//! decision/lifecycle events to zero or more pluggable sinks. Each sink
//! gets its own bounded FIFO queue and task: one slow or failing sink can
//! never block the decision path or starve another sink.

pub mod sink;

pub use sink::{LogSink, NotificationSink, WebhookSink};

use crate::model::InstanceId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Capability set of notification types a sink can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Idle,
    ScheduledAction,
    ActionExecuted,
    Error,
    StateChange,
}

/// Severity of a notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub severity: NotificationSeverity,
    pub instance_id: Option<InstanceId>,
    pub message: String,
    pub timestamp: String,
}

impl NotificationEvent {
    pub fn new(kind: NotificationKind, severity: NotificationSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            instance_id: None,
            message: message.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn for_instance(mut self, id: &InstanceId) -> Self {
        self.instance_id = Some(id.clone());
        self
    }
}

/// Per-sink mailbox depth. Bounded so a wedged sink applies backpressure to
/// its own task only, never to the dispatch loop or the submitting caller.
const SINK_QUEUE_DEPTH: usize = 1024;

struct RegisteredSink {
    name: String,
    capabilities: BTreeSet<NotificationKind>,
    tx: mpsc::Sender<NotificationEvent>,
}

/// Fan-out manager: callers call `submit`, which never blocks on delivery.
pub struct NotificationManager {
    tx: mpsc::UnboundedSender<NotificationEvent>,
    sinks: Arc<tokio::sync::RwLock<Vec<RegisteredSink>>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<NotificationEvent>();
        let sinks: Arc<tokio::sync::RwLock<Vec<RegisteredSink>>> = Arc::new(tokio::sync::RwLock::new(Vec::new()));

        let dispatch_sinks = sinks.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let sinks = dispatch_sinks.read().await;
                for sink in sinks.iter() {
                    if !sink.capabilities.contains(&event.kind) {
                        continue;
                    }
                    // try_send, not send: a full per-sink queue means that sink
                    // is the slow one; drop-and-log there rather than block
                    // every other sink's delivery on it.
                    if sink.tx.try_send(event.clone()).is_err() {
                        warn!(sink = %sink.name, kind = ?event.kind, "notification sink queue full, dropping event");
                    }
                }
            }
        });

        Self { tx, sinks }
    }

    /// Registers a sink under `name` with the notification kinds it wants to
    /// receive, and spawns its dedicated per-sink FIFO delivery task.
    pub async fn register(&self, sink: Arc<dyn NotificationSink>, capabilities: BTreeSet<NotificationKind>) {
        let name = sink.name().to_string();
        let (tx, mut rx) = mpsc::channel::<NotificationEvent>(SINK_QUEUE_DEPTH);

        let task_name = name.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Delivery failures are logged but never surface to the
                // caller: one failing sink never stalls the dispatch loop
                // because this loop only ever touches its own
                // channel.
                if let Err(e) = sink.deliver(&event).await {
                    warn!(sink = %task_name, error = %e, "notification delivery failed");
                }
            }
        });

        self.sinks.write().await.push(RegisteredSink { name, capabilities, tx });
    }

    /// Submits an event for asynchronous fan-out. Never blocks; the caller's
    /// decision path never waits on sink delivery.
    pub fn submit(&self, event: NotificationEvent) {
        if self.tx.send(event).is_err() {
            warn!("notification dispatch task is gone, event dropped");
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of per-sink delivery counts, used by admin/status endpoints and
/// by tests instead of adding observability hooks to the hot path.
#[derive(Debug, Clone, Default)]
pub struct DeliveryCounts(pub HashMap<String, u64>);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct CountingSink {
        name: String,
        count: Arc<AtomicU64>,
    }

    #[async_trait::async_trait]
    impl NotificationSink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&self, _event: &NotificationEvent) -> Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSink {
        name: String,
        count: Arc<AtomicU64>,
    }

    #[async_trait::async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&self, _event: &NotificationEvent) -> Result<(), String> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Err("simulated sink failure".to_string())
        }
    }

    #[tokio::test]
    async fn event_reaches_only_sinks_with_matching_capability() {
        let manager = NotificationManager::new();
        let idle_count = Arc::new(AtomicU64::new(0));
        let state_count = Arc::new(AtomicU64::new(0));

        manager
            .register(
                Arc::new(CountingSink { name: "idle-sink".into(), count: idle_count.clone() }),
                [NotificationKind::Idle].into_iter().collect(),
            )
            .await;
        manager
            .register(
                Arc::new(CountingSink { name: "state-sink".into(), count: state_count.clone() }),
                [NotificationKind::StateChange].into_iter().collect(),
            )
            .await;

        manager.submit(NotificationEvent::new(
            NotificationKind::Idle,
            NotificationSeverity::Info,
            "idle detected",
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
        assert_eq!(state_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_failing_sink_does_not_block_another() {
        let manager = NotificationManager::new();
        let failing_count = Arc::new(AtomicU64::new(0));
        let healthy_count = Arc::new(AtomicU64::new(0));

        manager
            .register(
                Arc::new(FailingSink { name: "failing".into(), count: failing_count.clone() }),
                [NotificationKind::Error].into_iter().collect(),
            )
            .await;
        manager
            .register(
                Arc::new(CountingSink { name: "healthy".into(), count: healthy_count.clone() }),
                [NotificationKind::Error].into_iter().collect(),
            )
            .await;

        for _ in 0..5 {
            manager.submit(NotificationEvent::new(NotificationKind::Error, NotificationSeverity::Error, "boom"));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(failing_count.load(Ordering::SeqCst), 5);
        assert_eq!(healthy_count.load(Ordering::SeqCst), 5);
    }
}

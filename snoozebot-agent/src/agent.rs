//! The central Agent: wires the Store, Policy Engine, Plugin Runtime,
//! Security Pipeline, and Notification Pipeline together behind the single
//! set of operations the Ingress API exposes over both transports, plus
//! the heartbeat/scheduled-action loop.
//!
//! A thin struct holding `Arc`s to each subsystem, with one method per
//! externally-visible operation, so both the HTTP and gRPC ingress layers
//! can share this exact implementation and never semantically diverge.

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::model::{
    ActionId, ActionKind, IdleInfo, InstanceId, InstanceSnapshot, InstanceState, Registration, ScheduledAction,
};
use crate::notification::{NotificationEvent, NotificationKind, NotificationManager, NotificationSeverity};
use crate::plugin::{LoadedPluginInfo, PluginRuntime};
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::security::auth::Role;
use crate::security::event_log::{SecurityEvent, Severity as SecuritySeverity};
use crate::security::SecurityPipeline;
use crate::store::Store;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use uuid::Uuid;

/// Top-level decision + dispatch engine the two Ingress transports share.
pub struct Agent {
    pub id: String,
    pub config: AgentConfig,
    pub store: Arc<dyn Store>,
    pub policy: PolicyEngine,
    pub plugins: Arc<PluginRuntime>,
    pub security: Arc<SecurityPipeline>,
    pub notifications: Arc<NotificationManager>,
}

/// `IdleNotification` response shape.
pub struct IdleOutcome {
    pub decision: PolicyDecision,
    pub scheduled_action: Option<ScheduledAction>,
}

/// `Heartbeat` response shape.
pub struct HeartbeatOutcome {
    pub acknowledged: bool,
    pub commands: Vec<ScheduledAction>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        store: Arc<dyn Store>,
        plugins: Arc<PluginRuntime>,
        security: Arc<SecurityPipeline>,
        notifications: Arc<NotificationManager>,
    ) -> Self {
        let stop_delay = config.stop_delay();
        Self {
            id: format!("snoozebot-{}", Uuid::new_v4()),
            config,
            store,
            policy: PolicyEngine::new(stop_delay),
            plugins,
            security,
            notifications,
        }
    }

    // ---- Registration / Unregistration -----------------------------

    pub async fn register(&self, id: InstanceId, mut registration: Registration, now: SystemTime) -> AgentResult<u64> {
        if registration.nap_time_duration.is_zero() {
            registration.nap_time_duration = self.config.idle_timeout();
        }
        self.store.register(id.clone(), registration, now).await?;
        info!(instance_id = %id, "instance registered");
        Ok(self.config.heartbeat_interval_seconds)
    }

    /// Idempotent: unregister with force on an unknown instance returns ok.
    pub async fn unregister(&self, id: &InstanceId, force: bool) -> AgentResult<()> {
        match self.store.unregister(id).await {
            Ok(()) => {
                info!(instance_id = %id, "instance unregistered");
                Ok(())
            }
            Err(AgentError::NotFound(_)) if force => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: &InstanceId) -> AgentResult<InstanceSnapshot> {
        self.store.get(id).await
    }

    pub async fn list_all(&self) -> Vec<InstanceSnapshot> {
        self.store.list_all().await
    }

    pub async fn list_by_state(&self, state: InstanceState) -> Vec<InstanceSnapshot> {
        self.store.list_by_state(state).await
    }

    // ---- IdleNotification --------------------------------------------

    pub async fn idle_notification(
        &self,
        id: &InstanceId,
        idle_since: SystemTime,
        idle_duration: Duration,
        resource_usage: Vec<(String, f64)>,
        now: SystemTime,
    ) -> AgentResult<IdleOutcome> {
        let snapshot = self.store.get(id).await?;
        self.store.update_idle(id, true, Some(idle_since), idle_duration).await?;
        self.store.update_resource_usage(id, resource_usage).await?;
        if snapshot.current_state == InstanceState::Running {
            self.store.update_state(id, InstanceState::Idle, now, "idle notification").await?;
        }

        // Re-read after the clamp in UpdateIdle so the decision uses the
        // authoritative, monotone idle_duration rather than the raw report.
        // `has_pending_stop` here is a tentative, non-atomic read: it only
        // shapes the reported Wait/Stop reason text, never whether a stop
        // actually gets scheduled -- that is decided atomically below.
        let snapshot = self.store.get(id).await?;
        let has_pending_stop = snapshot.scheduled_actions.iter().any(|a| a.action == ActionKind::Stop);
        let mut decision = self.policy.evaluate(&snapshot, snapshot.idle.idle_duration, now, has_pending_stop);

        self.notifications.submit(
            NotificationEvent::new(NotificationKind::Idle, NotificationSeverity::Info, "instance reported idle")
                .for_instance(id),
        );

        let scheduled_action = match &decision {
            PolicyDecision::Stop { scheduled_time, reason } => {
                let action = ScheduledAction {
                    id: ActionId::generate(),
                    action: ActionKind::Stop,
                    scheduled_time: *scheduled_time,
                    reason: reason.clone(),
                };
                // Single atomic check-and-insert under the instance's lock:
                // concurrent callers can never both win this race.
                if self.store.add_stop_if_none_pending(id, action.clone()).await? {
                    self.notifications.submit(
                        NotificationEvent::new(
                            NotificationKind::ScheduledAction,
                            NotificationSeverity::Info,
                            format!("stop scheduled: {reason}"),
                        )
                        .for_instance(id),
                    );
                    Some(action)
                } else {
                    decision = PolicyDecision::Wait {
                        reason: "stop already scheduled".to_string(),
                    };
                    None
                }
            }
            PolicyDecision::Wait { .. } => None,
        };

        Ok(IdleOutcome { decision, scheduled_action })
    }

    // ---- Heartbeat ----------------------------------------------------

    /// Applies the heartbeat iff strictly newer than the last one; always
    /// acknowledges unless the instance is unknown to the Store. `commands`
    /// reports due/pending scheduled actions for visibility only -- the
    /// heartbeat/scheduled-action loop is the sole dispatcher, so this never
    /// double-executes an action.
    pub async fn heartbeat(
        &self,
        id: &InstanceId,
        timestamp: SystemTime,
        reported_state: InstanceState,
        resource_usage: Vec<(String, f64)>,
        now: SystemTime,
    ) -> AgentResult<HeartbeatOutcome> {
        let snapshot = self.store.get(id).await?;
        self.store.update_heartbeat(id, timestamp).await?;
        self.store.update_resource_usage(id, resource_usage).await?;

        if timestamp >= snapshot.last_heartbeat {
            if reported_state == InstanceState::Running {
                // Reported state `running` pulls the instance back from
                // unknown, stopped, starting, or idle.
                let _ = self.store.update_state(id, InstanceState::Running, now, "heartbeat").await;
            }
        }

        let snapshot = self.store.get(id).await?;
        let commands = snapshot
            .scheduled_actions
            .iter()
            .filter(|a| a.scheduled_time <= now)
            .cloned()
            .collect();

        Ok(HeartbeatOutcome { acknowledged: true, commands })
    }

    // ---- StateChangeReport --------------------------------------------

    pub async fn report_state_change(
        &self,
        id: &InstanceId,
        current_state: InstanceState,
        reason: &str,
        now: SystemTime,
    ) -> AgentResult<()> {
        self.store.update_state(id, current_state, now, reason).await?;
        self.notifications.submit(
            NotificationEvent::new(
                NotificationKind::StateChange,
                NotificationSeverity::Info,
                format!("state changed to {}: {reason}", current_state.as_str()),
            )
            .for_instance(id),
        );
        Ok(())
    }

    // ---- Admin: explicit scheduling ------------------------------------

    pub async fn schedule_action(&self, id: &InstanceId, action: ScheduledAction) -> AgentResult<()> {
        self.store.add_scheduled_action(id, action.clone()).await?;
        self.notifications.submit(
            NotificationEvent::new(
                NotificationKind::ScheduledAction,
                NotificationSeverity::Info,
                format!("action {} explicitly scheduled: {}", action.action.as_str(), action.reason),
            )
            .for_instance(id),
        );
        Ok(())
    }

    // ---- Admin: plugin lifecycle ---------------------------------------

    pub async fn plugin_discover(&self) -> AgentResult<Vec<String>> {
        self.plugins.discover().await
    }

    pub async fn plugin_load(&self, plugin_name: &str) -> AgentResult<()> {
        self.plugins.ensure_loaded(plugin_name).await
    }

    pub async fn plugin_unload(&self, plugin_name: &str, force: bool) -> AgentResult<()> {
        self.plugins.unload(plugin_name, force).await
    }

    pub async fn plugin_info(&self) -> Vec<LoadedPluginInfo> {
        self.plugins.loaded_plugins().await
    }

    // ---- Admin: auth ---------------------------------------------------

    pub fn auth_status(&self) -> bool {
        self.security.auth_enabled
    }

    pub fn issue_api_key(&self, plugin_name: &str, role: Role, description: &str) -> AgentResult<String> {
        self.security.issue_api_key(plugin_name, role, description)
    }

    pub fn revoke_api_key(&self, plugin_name: &str) -> AgentResult<bool> {
        self.security.revoke_api_key(plugin_name)
    }

    // ---- Heartbeat & Scheduled-Action Loop -----------------------------

    /// Runs forever on `config.heartbeat_tick()`; spawn with `tokio::spawn`.
    pub async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_tick());
        loop {
            ticker.tick().await;
            self.heartbeat_tick(SystemTime::now()).await;
        }
    }

    async fn heartbeat_tick(&self, now: SystemTime) {
        let timeout = self.config.heartbeat_timeout();
        for id in self.store.all_ids().await {
            if let Err(e) = self.check_heartbeat_timeout(&id, now, timeout).await {
                warn!(instance_id = %id, error = %e, "heartbeat timeout check failed");
            }
            if let Err(e) = self.dispatch_due_actions(&id, now).await {
                warn!(instance_id = %id, error = %e, "scheduled-action dispatch failed");
            }
        }
    }

    async fn check_heartbeat_timeout(&self, id: &InstanceId, now: SystemTime, timeout: Duration) -> AgentResult<()> {
        let snapshot = self.store.get(id).await?;
        let elapsed = now.duration_since(snapshot.last_heartbeat).unwrap_or_default();
        if elapsed > timeout && snapshot.current_state != InstanceState::Unknown {
            self.store
                .update_state(id, InstanceState::Unknown, now, "heartbeat timeout")
                .await?;
            warn!(instance_id = %id, "heartbeat lost, instance marked unknown");
            self.notifications.submit(
                NotificationEvent::new(NotificationKind::Error, NotificationSeverity::Warning, "heartbeat_lost")
                    .for_instance(id),
            );
        }
        Ok(())
    }

    async fn dispatch_due_actions(&self, id: &InstanceId, now: SystemTime) -> AgentResult<()> {
        let due = self.store.pop_due_actions(id, now).await?;
        for action in due {
            self.dispatch_action(id, action).await;
        }
        Ok(())
    }

    /// At most one in-flight cloud operation per instance. An action
    /// that loses the race is re-inserted rather than dropped.
    async fn dispatch_action(&self, id: &InstanceId, action: ScheduledAction) {
        if !self.store.try_begin_in_flight(id).await.unwrap_or(false) {
            let _ = self.store.add_scheduled_action(id, action).await;
            return;
        }

        let snapshot = match self.store.get(id).await {
            Ok(s) => s,
            Err(_) => {
                let _ = self.store.end_in_flight(id).await;
                return;
            }
        };
        let provider = snapshot.registration.provider.clone();

        let result = match action.action {
            ActionKind::Stop => {
                let transitioned = self
                    .store
                    .update_state(id, InstanceState::Stopping, SystemTime::now(), &action.reason)
                    .await;
                if transitioned.is_ok() {
                    self.plugins.stop_instance(&provider, &id.0).await
                } else {
                    transitioned
                }
            }
            ActionKind::Start => {
                let transitioned = self
                    .store
                    .update_state(id, InstanceState::Starting, SystemTime::now(), &action.reason)
                    .await;
                if transitioned.is_ok() {
                    self.plugins.start_instance(&provider, &id.0).await
                } else {
                    transitioned
                }
            }
        };

        match result {
            Ok(()) => {
                let completed_state = match action.action {
                    ActionKind::Stop => InstanceState::Stopped,
                    ActionKind::Start => InstanceState::Running,
                };
                let _ = self
                    .store
                    .update_state(id, completed_state, SystemTime::now(), "cloud action completed")
                    .await;
                info!(instance_id = %id, action = action.action.as_str(), "cloud action executed");
                self.notifications.submit(
                    NotificationEvent::new(
                        NotificationKind::ActionExecuted,
                        NotificationSeverity::Info,
                        format!("{} executed", action.action.as_str()),
                    )
                    .for_instance(id),
                );
            }
            Err(e) => {
                warn!(instance_id = %id, action = action.action.as_str(), error = %e, "cloud action failed");
                if e.is_security_event() {
                    self.security.events.record(
                        SecurityEvent::new("plugin", SecuritySeverity::Warning, e.to_string()).with_plugin(&provider),
                    );
                }
                self.notifications.submit(
                    NotificationEvent::new(
                        NotificationKind::Error,
                        NotificationSeverity::Error,
                        format!("{} failed: {e}", action.action.as_str()),
                    )
                    .for_instance(id),
                );
            }
        }
        let _ = self.store.end_in_flight(id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::security::event_log::SecurityEventLog;
    use crate::store::InMemoryStore;

    async fn test_agent() -> Agent {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.base_dir = dir.path().to_path_buf();
        config.plugin_dir = dir.path().join("plugins");
        config.security_log.path = dir.path().join("security.log");
        config.auth.auth_config = dir.path().join("auth.json");
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let events = Arc::new(SecurityEventLog::new(config.security_log.path.clone(), config.security_log.max_bytes, config.security_log.max_rotations));
        let security = Arc::new(SecurityPipeline::new(&config, events).unwrap());
        let plugins = Arc::new(PluginRuntime::new(&config, security.clone()));
        let notifications = Arc::new(NotificationManager::new());
        Agent::new(config, store, plugins, security, notifications)
    }

    fn registration() -> Registration {
        Registration {
            instance_type: "t3.micro".into(),
            region: "us-east-1".into(),
            zone: "us-east-1a".into(),
            provider: "aws".into(),
            metadata: vec![],
            nap_time_duration: Duration::from_secs(30 * 60),
        }
    }

    #[tokio::test]
    async fn idle_below_threshold_waits_with_no_scheduled_action() {
        let agent = test_agent().await;
        let id = InstanceId::new("i-1");
        let now = SystemTime::now();
        agent.register(id.clone(), registration(), now).await.unwrap();

        let outcome = agent
            .idle_notification(&id, now, Duration::from_secs(10 * 60), vec![], now)
            .await
            .unwrap();

        assert!(matches!(outcome.decision, PolicyDecision::Wait { .. }));
        assert!(outcome.scheduled_action.is_none());
        let snapshot = agent.get(&id).await.unwrap();
        assert!(snapshot.idle.is_idle);
        assert!(snapshot.scheduled_actions.is_empty());
    }

    #[tokio::test]
    async fn idle_at_threshold_schedules_stop() {
        let agent = test_agent().await;
        let id = InstanceId::new("i-1");
        let now = SystemTime::now();
        agent.register(id.clone(), registration(), now).await.unwrap();

        let outcome = agent
            .idle_notification(&id, now, Duration::from_secs(30 * 60), vec![], now)
            .await
            .unwrap();

        assert!(matches!(outcome.decision, PolicyDecision::Stop { .. }));
        assert!(outcome.scheduled_action.is_some());
        let snapshot = agent.get(&id).await.unwrap();
        assert_eq!(snapshot.scheduled_actions.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_idle_notifications_schedule_exactly_one_stop() {
        let agent = Arc::new(test_agent().await);
        let id = InstanceId::new("i-1");
        let now = SystemTime::now();
        agent.register(id.clone(), registration(), now).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let agent = agent.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                agent.idle_notification(&id, now, Duration::from_secs(31 * 60), vec![], now).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let snapshot = agent.get(&id).await.unwrap();
        assert_eq!(snapshot.scheduled_actions.len(), 1);
    }

    #[tokio::test]
    async fn heartbeat_loss_transitions_to_unknown() {
        let agent = test_agent().await;
        let id = InstanceId::new("i-1");
        let t0 = SystemTime::now();
        agent.register(id.clone(), registration(), t0).await.unwrap();
        agent.heartbeat(&id, t0, InstanceState::Running, vec![], t0).await.unwrap();

        let later = t0 + agent.config.heartbeat_timeout() + Duration::from_secs(1);
        agent.heartbeat_tick(later).await;

        let snapshot = agent.get(&id).await.unwrap();
        assert_eq!(snapshot.current_state, InstanceState::Unknown);
    }

    #[tokio::test]
    async fn unregister_force_on_unknown_instance_is_ok() {
        let agent = test_agent().await;
        let id = InstanceId::new("ghost");
        agent.unregister(&id, true).await.unwrap();
        assert!(agent.unregister(&id, false).await.is_err());
    }
}

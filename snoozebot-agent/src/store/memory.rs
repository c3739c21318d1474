//! In-memory `Store` implementation: a top-level `RwLock<HashMap<..>>` for
//! creation/deletion guarding per-instance `Mutex<InstanceRecord>` entries.
//! Mutations on one instance never block operations on another.

use super::Store;
use crate::error::{AgentError, AgentResult};
use crate::model::{ActionKind, InstanceId, InstanceRecord, InstanceSnapshot, InstanceState, Registration, ScheduledAction};
use crate::state_machine::check_transition;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

type Shard = Arc<Mutex<InstanceRecord>>;

#[derive(Default)]
pub struct InMemoryStore {
    instances: RwLock<HashMap<InstanceId, Shard>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
        }
    }

    async fn shard(&self, id: &InstanceId) -> AgentResult<Shard> {
        self.instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("instance {id}")))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn register(&self, id: InstanceId, registration: Registration, now: SystemTime) -> AgentResult<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&id) {
            return Err(AgentError::AlreadyExists(format!("instance {id}")));
        }
        let record = InstanceRecord::new(id.clone(), registration, now);
        instances.insert(id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    async fn unregister(&self, id: &InstanceId) -> AgentResult<()> {
        let mut instances = self.instances.write().await;
        instances
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| AgentError::NotFound(format!("instance {id}")))
    }

    async fn get(&self, id: &InstanceId) -> AgentResult<InstanceSnapshot> {
        let shard = self.shard(id).await?;
        let record = shard.lock().await;
        Ok(record.snapshot())
    }

    async fn update_state(&self, id: &InstanceId, new_state: InstanceState, now: SystemTime, reason: &str) -> AgentResult<()> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        let from = record.current_state;
        check_transition(from, new_state).map_err(|reason| {
            warn!(instance_id = %id, from = from.as_str(), to = new_state.as_str(), "rejected illegal state transition");
            AgentError::InvalidTransition(reason)
        })?;
        if from != new_state {
            record.push_history(from, new_state, now, reason);
            record.current_state = new_state;
        }
        Ok(())
    }

    async fn update_idle(
        &self,
        id: &InstanceId,
        is_idle: bool,
        idle_since: Option<SystemTime>,
        idle_duration: std::time::Duration,
    ) -> AgentResult<()> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        if is_idle {
            // idle_duration is monotone non-decreasing while is_idle holds.
            let clamped = if record.idle.is_idle {
                idle_duration.max(record.idle.idle_duration)
            } else {
                idle_duration
            };
            record.idle.is_idle = true;
            record.idle.idle_since = idle_since.or(record.idle.idle_since);
            record.idle.idle_duration = clamped;
        } else {
            // Clearing is_idle clears idle_since too.
            record.idle.is_idle = false;
            record.idle.idle_since = None;
            record.idle.idle_duration = std::time::Duration::ZERO;
        }
        Ok(())
    }

    async fn update_heartbeat(&self, id: &InstanceId, ts: SystemTime) -> AgentResult<()> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        if ts > record.last_heartbeat {
            record.last_heartbeat = ts;
        }
        Ok(())
    }

    async fn update_resource_usage(&self, id: &InstanceId, usage: Vec<(String, f64)>) -> AgentResult<()> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        record.resource_usage = usage;
        Ok(())
    }

    async fn add_scheduled_action(&self, id: &InstanceId, action: ScheduledAction) -> AgentResult<()> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        if record.scheduled_actions.iter().any(|a| a.id == action.id) {
            return Ok(()); // idempotent on action.id
        }
        let pos = record
            .scheduled_actions
            .partition_point(|a| a.scheduled_time <= action.scheduled_time);
        record.scheduled_actions.insert(pos, action);
        Ok(())
    }

    async fn add_stop_if_none_pending(&self, id: &InstanceId, action: ScheduledAction) -> AgentResult<bool> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        if record.scheduled_actions.iter().any(|a| a.action == ActionKind::Stop) {
            return Ok(false);
        }
        let pos = record
            .scheduled_actions
            .partition_point(|a| a.scheduled_time <= action.scheduled_time);
        record.scheduled_actions.insert(pos, action);
        Ok(true)
    }

    async fn pop_due_actions(&self, id: &InstanceId, now: SystemTime) -> AgentResult<Vec<ScheduledAction>> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        let split_at = record
            .scheduled_actions
            .iter()
            .take_while(|a| a.scheduled_time <= now)
            .count();
        Ok(record.scheduled_actions.drain(..split_at).collect())
    }

    async fn list_by_state(&self, state: InstanceState) -> Vec<InstanceSnapshot> {
        let shards: Vec<Shard> = self.instances.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for shard in shards {
            let record = shard.lock().await;
            if record.current_state == state {
                out.push(record.snapshot());
            }
        }
        out
    }

    async fn list_all(&self) -> Vec<InstanceSnapshot> {
        let shards: Vec<Shard> = self.instances.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(shards.len());
        for shard in shards {
            out.push(shard.lock().await.snapshot());
        }
        out
    }

    async fn all_ids(&self) -> Vec<InstanceId> {
        self.instances.read().await.keys().cloned().collect()
    }

    async fn try_begin_in_flight(&self, id: &InstanceId) -> AgentResult<bool> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        if record.in_flight {
            Ok(false)
        } else {
            record.in_flight = true;
            Ok(true)
        }
    }

    async fn end_in_flight(&self, id: &InstanceId) -> AgentResult<()> {
        let shard = self.shard(id).await?;
        let mut record = shard.lock().await;
        record.in_flight = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registration() -> Registration {
        Registration {
            instance_type: "t3.micro".into(),
            region: "us-east-1".into(),
            zone: "us-east-1a".into(),
            provider: "aws".into(),
            metadata: vec![],
            nap_time_duration: Duration::from_secs(1800),
        }
    }

    #[tokio::test]
    async fn register_then_get_round_trips_registration() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        let now = SystemTime::now();
        store.register(id.clone(), registration(), now).await.unwrap();
        let snap = store.get(&id).await.unwrap();
        assert_eq!(snap.registration.instance_type, "t3.micro");
        assert_eq!(snap.current_state, InstanceState::Unknown);
    }

    #[tokio::test]
    async fn unregister_then_get_is_not_found() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        store.register(id.clone(), registration(), SystemTime::now()).await.unwrap();
        store.unregister(&id).await.unwrap();
        assert!(matches!(store.get(&id).await, Err(AgentError::NotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_register_is_already_exists() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        store.register(id.clone(), registration(), SystemTime::now()).await.unwrap();
        let err = store.register(id, registration(), SystemTime::now()).await.unwrap_err();
        assert!(matches!(err, AgentError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn heartbeat_only_advances_forward() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        let t0 = SystemTime::now();
        store.register(id.clone(), registration(), t0).await.unwrap();
        let t1 = t0 + Duration::from_secs(10);
        store.update_heartbeat(&id, t1).await.unwrap();
        // older timestamp silently discarded
        store.update_heartbeat(&id, t0).await.unwrap();
        let snap = store.get(&id).await.unwrap();
        assert_eq!(snap.last_heartbeat, t1);
    }

    #[tokio::test]
    async fn idle_duration_is_clamped_non_decreasing() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        store.register(id.clone(), registration(), SystemTime::now()).await.unwrap();
        store
            .update_idle(&id, true, Some(SystemTime::now()), Duration::from_secs(600))
            .await
            .unwrap();
        store
            .update_idle(&id, true, Some(SystemTime::now()), Duration::from_secs(100))
            .await
            .unwrap();
        let snap = store.get(&id).await.unwrap();
        assert_eq!(snap.idle.idle_duration, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn clearing_idle_clears_idle_since_too() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        store.register(id.clone(), registration(), SystemTime::now()).await.unwrap();
        store
            .update_idle(&id, true, Some(SystemTime::now()), Duration::from_secs(600))
            .await
            .unwrap();
        store.update_idle(&id, false, None, Duration::ZERO).await.unwrap();
        let snap = store.get(&id).await.unwrap();
        assert!(!snap.idle.is_idle);
        assert!(snap.idle.idle_since.is_none());
    }

    #[tokio::test]
    async fn pop_due_actions_returns_each_action_exactly_once() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        let now = SystemTime::now();
        store.register(id.clone(), registration(), now).await.unwrap();
        let action = ScheduledAction {
            id: crate::model::ActionId::generate(),
            action: ActionKind::Stop,
            scheduled_time: now,
            reason: "idle timeout".into(),
        };
        store.add_scheduled_action(&id, action.clone()).await.unwrap();
        // duplicate id is a no-op
        store.add_scheduled_action(&id, action.clone()).await.unwrap();

        let popped = store.pop_due_actions(&id, now + Duration::from_secs(1)).await.unwrap();
        assert_eq!(popped.len(), 1);
        let popped_again = store.pop_due_actions(&id, now + Duration::from_secs(1)).await.unwrap();
        assert!(popped_again.is_empty());
    }

    #[tokio::test]
    async fn add_stop_if_none_pending_only_inserts_once() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        let now = SystemTime::now();
        store.register(id.clone(), registration(), now).await.unwrap();

        let first = ScheduledAction {
            id: crate::model::ActionId::generate(),
            action: ActionKind::Stop,
            scheduled_time: now,
            reason: "idle timeout".into(),
        };
        let second = ScheduledAction {
            id: crate::model::ActionId::generate(),
            action: ActionKind::Stop,
            scheduled_time: now,
            reason: "idle timeout".into(),
        };

        assert!(store.add_stop_if_none_pending(&id, first.clone()).await.unwrap());
        assert!(!store.add_stop_if_none_pending(&id, second).await.unwrap());

        let snap = store.get(&id).await.unwrap();
        assert_eq!(snap.scheduled_actions.len(), 1);
        assert_eq!(snap.scheduled_actions[0].id, first.id);
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        let now = SystemTime::now();
        store.register(id.clone(), registration(), now).await.unwrap();
        store.update_state(&id, InstanceState::Stopped, now, "test").await.unwrap();
        let err = store.update_state(&id, InstanceState::Idle, now, "test").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn only_one_in_flight_operation_at_a_time() {
        let store = InMemoryStore::new();
        let id = InstanceId::new("i-1");
        store.register(id.clone(), registration(), SystemTime::now()).await.unwrap();
        assert!(store.try_begin_in_flight(&id).await.unwrap());
        assert!(!store.try_begin_in_flight(&id).await.unwrap());
        store.end_in_flight(&id).await.unwrap();
        assert!(store.try_begin_in_flight(&id).await.unwrap());
    }
}

//! Instance state store: a keyed repository of instance records with
//! atomic per-instance mutations, exposed as a trait so the in-memory
//! implementation is one possible backend, not the only one.

mod memory;

pub use memory::InMemoryStore;

use crate::error::AgentResult;
use crate::model::{InstanceId, InstanceSnapshot, InstanceState, Registration, ScheduledAction};
use async_trait::async_trait;
use std::time::SystemTime;

#[async_trait]
pub trait Store: Send + Sync {
    async fn register(&self, id: InstanceId, registration: Registration, now: SystemTime) -> AgentResult<()>;

    async fn unregister(&self, id: &InstanceId) -> AgentResult<()>;

    async fn get(&self, id: &InstanceId) -> AgentResult<InstanceSnapshot>;

    async fn update_state(&self, id: &InstanceId, new_state: InstanceState, now: SystemTime, reason: &str) -> AgentResult<()>;

    async fn update_idle(
        &self,
        id: &InstanceId,
        is_idle: bool,
        idle_since: Option<SystemTime>,
        idle_duration: std::time::Duration,
    ) -> AgentResult<()>;

    /// Older timestamps are silently discarded (never applied, never an error).
    async fn update_heartbeat(&self, id: &InstanceId, ts: SystemTime) -> AgentResult<()>;

    async fn update_resource_usage(&self, id: &InstanceId, usage: Vec<(String, f64)>) -> AgentResult<()>;

    /// Idempotent on `action.id`; no-op (not an error) if the id is already present.
    async fn add_scheduled_action(&self, id: &InstanceId, action: ScheduledAction) -> AgentResult<()>;

    /// Atomically checks for an already-pending `Stop` action and inserts
    /// `action` only if none exists, under the same per-instance lock.
    /// Returns whether `action` was the one inserted, so concurrent callers
    /// racing on the same instance can never both win.
    async fn add_stop_if_none_pending(&self, id: &InstanceId, action: ScheduledAction) -> AgentResult<bool>;

    /// Atomically removes and returns every action with `scheduled_time <= now`.
    async fn pop_due_actions(&self, id: &InstanceId, now: SystemTime) -> AgentResult<Vec<ScheduledAction>>;

    async fn list_by_state(&self, state: InstanceState) -> Vec<InstanceSnapshot>;

    async fn list_all(&self) -> Vec<InstanceSnapshot>;

    async fn all_ids(&self) -> Vec<InstanceId>;

    /// Attempt to mark an in-flight cloud operation; returns false if one
    /// is already in flight for this instance (at most one in-flight call
    /// per instance at any time).
    async fn try_begin_in_flight(&self, id: &InstanceId) -> AgentResult<bool>;

    async fn end_in_flight(&self, id: &InstanceId) -> AgentResult<()>;
}

//! Instance data model: registration, state, idle tracking, scheduled
//! actions, and the bounded transition history ring.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

/// Opaque, globally unique (across providers) instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier of a scheduled action, unique within one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Fields fixed at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub instance_type: String,
    pub region: String,
    pub zone: String,
    /// Logical plugin name; resolves cloud operations to a loaded plugin.
    pub provider: String,
    /// Ordered string-to-string map; `Vec` preserves registration order.
    pub metadata: Vec<(String, String)>,
    pub nap_time_duration: Duration,
}

/// Instance state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Unknown,
    Running,
    Idle,
    Stopping,
    Stopped,
    Starting,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Unknown => "unknown",
            InstanceState::Running => "running",
            InstanceState::Idle => "idle",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Starting => "starting",
        }
    }
}

impl std::str::FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(InstanceState::Unknown),
            "running" => Ok(InstanceState::Running),
            "idle" => Ok(InstanceState::Idle),
            "stopping" => Ok(InstanceState::Stopping),
            "stopped" => Ok(InstanceState::Stopped),
            "starting" => Ok(InstanceState::Starting),
            other => Err(format!("unrecognized instance state: {other}")),
        }
    }
}

/// `idle_since` is only meaningful while `is_idle` holds, and
/// `idle_duration` is clamped to be non-decreasing while idle persists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdleInfo {
    pub is_idle: bool,
    pub idle_since: Option<SystemTime>,
    pub idle_duration: Duration,
}

/// A future cloud operation to dispatch once its time arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub id: ActionId,
    pub action: ActionKind,
    pub scheduled_time: SystemTime,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Stop,
    Start,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Stop => "stop",
            ActionKind::Start => "start",
        }
    }
}

/// One recorded state transition, retained in `InstanceRecord::history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: InstanceState,
    pub to: InstanceState,
    pub at: SystemTime,
    pub reason: String,
}

/// Default bound on `InstanceRecord::history`.
pub const DEFAULT_HISTORY_CAPACITY: usize = 64;

/// The full, mutable instance record owned exclusively by the Store.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub registration: Registration,
    pub current_state: InstanceState,
    pub idle: IdleInfo,
    pub last_heartbeat: SystemTime,
    pub resource_usage: Vec<(String, f64)>,
    pub scheduled_actions: Vec<ScheduledAction>,
    pub history: VecDeque<StateTransition>,
    pub history_capacity: usize,
    /// At most one in-flight cloud operation per instance at any instant.
    pub in_flight: bool,
    pub registered_at: SystemTime,
}

impl InstanceRecord {
    pub fn new(id: InstanceId, registration: Registration, now: SystemTime) -> Self {
        Self {
            id,
            registration,
            current_state: InstanceState::Unknown,
            idle: IdleInfo::default(),
            last_heartbeat: now,
            resource_usage: Vec::new(),
            scheduled_actions: Vec::new(),
            history: VecDeque::new(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            in_flight: false,
            registered_at: now,
        }
    }

    pub fn push_history(&mut self, from: InstanceState, to: InstanceState, at: SystemTime, reason: impl Into<String>) {
        if self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from,
            to,
            at,
            reason: reason.into(),
        });
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            registration: self.registration.clone(),
            current_state: self.current_state,
            idle: self.idle.clone(),
            last_heartbeat: self.last_heartbeat,
            resource_usage: self.resource_usage.clone(),
            scheduled_actions: self.scheduled_actions.clone(),
            history: self.history.iter().cloned().collect(),
            in_flight: self.in_flight,
        }
    }
}

/// Immutable, `Clone`-able read view handed to callers outside the Store:
/// callers snapshot, release the lock, then act.
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub registration: Registration,
    pub current_state: InstanceState,
    pub idle: IdleInfo,
    pub last_heartbeat: SystemTime,
    pub resource_usage: Vec<(String, f64)>,
    pub scheduled_actions: Vec<ScheduledAction>,
    pub history: Vec<StateTransition>,
    pub in_flight: bool,
}

//! Policy engine: a single, side-effect-free decision function invoked
//! synchronously on every idle notification. Scheduling is the caller's
//! responsibility via `Store::add_scheduled_action`.

use crate::model::InstanceSnapshot;
use std::time::{Duration, SystemTime};

/// Delay applied between `now` and the scheduled stop time (default 5m).
pub const DEFAULT_STOP_DELAY: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Wait { reason: String },
    Stop { scheduled_time: SystemTime, reason: String },
}

pub struct PolicyEngine {
    stop_delay: Duration,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self {
            stop_delay: DEFAULT_STOP_DELAY,
        }
    }
}

impl PolicyEngine {
    pub fn new(stop_delay: Duration) -> Self {
        Self { stop_delay }
    }

    /// `has_pending_stop` lets the caller short-circuit re-scheduling when a
    /// stop action is already queued for this instance.
    pub fn evaluate(
        &self,
        instance: &InstanceSnapshot,
        reported_idle_duration: Duration,
        now: SystemTime,
        has_pending_stop: bool,
    ) -> PolicyDecision {
        let threshold = instance.registration.nap_time_duration;

        // Tie-break: equality yields stop.
        if reported_idle_duration >= threshold && !has_pending_stop {
            return PolicyDecision::Stop {
                scheduled_time: now + self.stop_delay,
                reason: "Idle timeout".to_string(),
            };
        }

        if has_pending_stop {
            PolicyDecision::Wait {
                reason: "stop already scheduled".to_string(),
            }
        } else {
            PolicyDecision::Wait {
                reason: format!(
                    "idle {}s below {}s threshold",
                    reported_idle_duration.as_secs(),
                    threshold.as_secs()
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IdleInfo, InstanceState, Registration};

    fn snapshot(nap_time: Duration) -> InstanceSnapshot {
        InstanceSnapshot {
            id: "i-1".into(),
            registration: Registration {
                instance_type: "t3.micro".into(),
                region: "us-east-1".into(),
                zone: "us-east-1a".into(),
                provider: "aws".into(),
                metadata: vec![],
                nap_time_duration: nap_time,
            },
            current_state: InstanceState::Idle,
            idle: IdleInfo::default(),
            last_heartbeat: SystemTime::now(),
            resource_usage: vec![],
            scheduled_actions: vec![],
            history: vec![],
            in_flight: false,
        }
    }

    #[test]
    fn below_threshold_waits() {
        let engine = PolicyEngine::default();
        let snap = snapshot(Duration::from_secs(30 * 60));
        let decision = engine.evaluate(&snap, Duration::from_secs(10 * 60), SystemTime::now(), false);
        assert!(matches!(decision, PolicyDecision::Wait { .. }));
    }

    #[test]
    fn at_threshold_schedules_stop_tie_break() {
        let engine = PolicyEngine::default();
        let nap = Duration::from_secs(30 * 60);
        let snap = snapshot(nap);
        let now = SystemTime::now();
        let decision = engine.evaluate(&snap, nap, now, false);
        match decision {
            PolicyDecision::Stop { scheduled_time, reason } => {
                assert_eq!(reason, "Idle timeout");
                assert!(scheduled_time >= now + DEFAULT_STOP_DELAY - Duration::from_millis(50));
            }
            _ => panic!("expected stop"),
        }
    }

    #[test]
    fn above_threshold_with_pending_stop_waits() {
        let engine = PolicyEngine::default();
        let nap = Duration::from_secs(30 * 60);
        let snap = snapshot(nap);
        let decision = engine.evaluate(&snap, nap + Duration::from_secs(60), SystemTime::now(), true);
        assert!(matches!(decision, PolicyDecision::Wait { .. }));
    }
}

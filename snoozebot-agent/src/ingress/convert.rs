//! Shared wire/domain conversions used by both ingress transports, so a
//! mapping bug can only ever live in one place.

use crate::error::{AgentError, AgentResult};
use crate::model::{ActionId, ActionKind, InstanceId, Registration, ScheduledAction};
use snoozebot_proto::ingress as proto;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn unix_to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-secs) as u64)
    }
}

pub fn system_time_to_unix(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

pub fn registration_from_proto(r: proto::Registration) -> Registration {
    Registration {
        instance_type: r.instance_type,
        region: r.region,
        zone: r.zone,
        provider: r.provider,
        metadata: r.metadata.into_iter().map(|e| (e.key, e.value)).collect(),
        nap_time_duration: Duration::from_secs(r.nap_time_seconds),
    }
}

pub fn action_kind_from_str(s: &str) -> AgentResult<ActionKind> {
    match s {
        "stop" => Ok(ActionKind::Stop),
        "start" => Ok(ActionKind::Start),
        other => Err(AgentError::InvalidArgument(format!("unrecognized action kind: {other}"))),
    }
}

pub fn scheduled_action_to_proto(a: &ScheduledAction) -> proto::ScheduledActionProto {
    proto::ScheduledActionProto {
        id: a.id.0.clone(),
        action: a.action.as_str().to_string(),
        scheduled_time_unix_seconds: system_time_to_unix(a.scheduled_time),
        reason: a.reason.clone(),
    }
}

pub fn scheduled_action_from_proto(p: proto::ScheduledActionProto) -> AgentResult<ScheduledAction> {
    Ok(ScheduledAction {
        id: ActionId(p.id),
        action: action_kind_from_str(&p.action)?,
        scheduled_time: unix_to_system_time(p.scheduled_time_unix_seconds),
        reason: p.reason,
    })
}

pub fn instance_state_from_str(s: &str) -> AgentResult<crate::model::InstanceState> {
    crate::model::InstanceState::from_str(s).map_err(AgentError::InvalidArgument)
}

pub fn instance_id(s: impl Into<String>) -> InstanceId {
    InstanceId::new(s)
}

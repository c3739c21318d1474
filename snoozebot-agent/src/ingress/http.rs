//! HTTP/JSON ingress transport: a thin `axum` router over the exact same
//! [`Agent`] operations the gRPC transport calls, using a
//! `State<Arc<Engine>>` + `Json<...>` handler shape.

use super::convert::{system_time_to_unix, unix_to_system_time};
use crate::agent::Agent;
use crate::error::AgentError;
use crate::model::{ActionId, ActionKind, InstanceId, InstanceState, Registration, ScheduledAction};
use crate::security::auth::Role;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/api/instances/register", post(register))
        .route("/api/instances/unregister", post(unregister))
        .route("/api/instances/idle", post(idle_notification))
        .route("/api/instances/heartbeat", post(heartbeat))
        .route("/api/instances/state", post(report_state_change))
        .route("/api/instances", get(list_instances))
        .route("/api/instances/{id}", get(get_instance))
        .route("/api/admin/schedule-action", post(schedule_action))
        .route("/api/admin/plugins/discover", get(plugin_discover))
        .route("/api/admin/plugins/{name}/load", post(plugin_load))
        .route("/api/admin/plugins/{name}/unload", post(plugin_unload))
        .route("/api/admin/plugins", get(plugin_info))
        .route("/api/admin/auth/status", get(auth_status))
        .route("/api/admin/auth/keys/{plugin_name}", post(issue_api_key).delete(revoke_api_key))
        .with_state(agent)
}

/// Uniform error body for every handler: `{kind, message}`.
struct ApiError(AgentError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({ "kind": self.0.kind(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        ApiError(e)
    }
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    instance_id: String,
    instance_type: String,
    region: String,
    zone: String,
    provider: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    nap_time_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    ok: bool,
    agent_id: String,
    heartbeat_interval_seconds: u64,
}

async fn register(State(agent): State<Arc<Agent>>, Json(body): Json<RegisterBody>) -> Result<Json<RegisterResponse>, ApiError> {
    let id = InstanceId::new(body.instance_id);
    let registration = Registration {
        instance_type: body.instance_type,
        region: body.region,
        zone: body.zone,
        provider: body.provider,
        metadata: body.metadata.into_iter().collect(),
        nap_time_duration: body.nap_time_seconds.map(Duration::from_secs).unwrap_or_default(),
    };
    let heartbeat_interval_seconds = agent.register(id, registration, SystemTime::now()).await?;
    Ok(Json(RegisterResponse { ok: true, agent_id: agent.id.clone(), heartbeat_interval_seconds }))
}

#[derive(Debug, Deserialize)]
struct UnregisterBody {
    instance_id: String,
    #[serde(default)]
    force: bool,
}

async fn unregister(State(agent): State<Arc<Agent>>, Json(body): Json<UnregisterBody>) -> Result<Json<serde_json::Value>, ApiError> {
    let id = InstanceId::new(body.instance_id);
    agent.unregister(&id, body.force).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
struct IdleBody {
    instance_id: String,
    idle_since_unix_seconds: i64,
    idle_duration_seconds: u64,
    #[serde(default)]
    resource_usage: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct IdleResponse {
    decision: String,
    reason: String,
    scheduled_action: Option<ScheduledActionView>,
}

#[derive(Debug, Serialize)]
struct ScheduledActionView {
    id: String,
    action: String,
    scheduled_time_unix_seconds: i64,
    reason: String,
}

impl From<&ScheduledAction> for ScheduledActionView {
    fn from(a: &ScheduledAction) -> Self {
        Self {
            id: a.id.0.clone(),
            action: a.action.as_str().to_string(),
            scheduled_time_unix_seconds: system_time_to_unix(a.scheduled_time),
            reason: a.reason.clone(),
        }
    }
}

async fn idle_notification(State(agent): State<Arc<Agent>>, Json(body): Json<IdleBody>) -> Result<Json<IdleResponse>, ApiError> {
    let id = InstanceId::new(body.instance_id);
    let now = SystemTime::now();
    let outcome = agent
        .idle_notification(
            &id,
            unix_to_system_time(body.idle_since_unix_seconds),
            Duration::from_secs(body.idle_duration_seconds),
            body.resource_usage.into_iter().collect(),
            now,
        )
        .await?;
    let (decision, reason) = match &outcome.decision {
        crate::policy::PolicyDecision::Wait { reason } => ("wait", reason.clone()),
        crate::policy::PolicyDecision::Stop { reason, .. } => ("stop", reason.clone()),
    };
    Ok(Json(IdleResponse {
        decision: decision.to_string(),
        reason,
        scheduled_action: outcome.scheduled_action.as_ref().map(ScheduledActionView::from),
    }))
}

#[derive(Debug, Deserialize)]
struct HeartbeatBody {
    instance_id: String,
    timestamp_unix_seconds: i64,
    state: String,
    #[serde(default)]
    resource_usage: HashMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    acknowledged: bool,
    commands: Vec<ScheduledActionView>,
}

async fn heartbeat(State(agent): State<Arc<Agent>>, Json(body): Json<HeartbeatBody>) -> Result<Json<HeartbeatResponse>, ApiError> {
    let id = InstanceId::new(body.instance_id);
    let now = SystemTime::now();
    let state = InstanceState::from_str(&body.state).map_err(AgentError::InvalidArgument)?;
    let outcome = agent
        .heartbeat(
            &id,
            unix_to_system_time(body.timestamp_unix_seconds),
            state,
            body.resource_usage.into_iter().collect(),
            now,
        )
        .await?;
    Ok(Json(HeartbeatResponse {
        acknowledged: outcome.acknowledged,
        commands: outcome.commands.iter().map(ScheduledActionView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct StateChangeBody {
    instance_id: String,
    current_state: String,
    reason: String,
}

async fn report_state_change(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<StateChangeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = InstanceId::new(body.instance_id);
    let state = InstanceState::from_str(&body.current_state).map_err(AgentError::InvalidArgument)?;
    agent.report_state_change(&id, state, &body.reason, SystemTime::now()).await?;
    Ok(Json(serde_json::json!({ "acknowledged": true })))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<String>,
}

#[derive(Debug, Serialize)]
struct InstanceView {
    id: String,
    provider: String,
    state: String,
    is_idle: bool,
    in_flight: bool,
    scheduled_actions: Vec<ScheduledActionView>,
}

impl From<&crate::model::InstanceSnapshot> for InstanceView {
    fn from(s: &crate::model::InstanceSnapshot) -> Self {
        Self {
            id: s.id.0.clone(),
            provider: s.registration.provider.clone(),
            state: s.current_state.as_str().to_string(),
            is_idle: s.idle.is_idle,
            in_flight: s.in_flight,
            scheduled_actions: s.scheduled_actions.iter().map(ScheduledActionView::from).collect(),
        }
    }
}

async fn list_instances(State(agent): State<Arc<Agent>>, Query(query): Query<ListQuery>) -> Result<Json<Vec<InstanceView>>, ApiError> {
    let snapshots = match query.state {
        Some(s) => {
            let state = InstanceState::from_str(&s).map_err(AgentError::InvalidArgument)?;
            agent.list_by_state(state).await
        }
        None => agent.list_all().await,
    };
    Ok(Json(snapshots.iter().map(InstanceView::from).collect()))
}

async fn get_instance(State(agent): State<Arc<Agent>>, Path(id): Path<String>) -> Result<Json<InstanceView>, ApiError> {
    let snapshot = agent.get(&InstanceId::new(id)).await?;
    Ok(Json(InstanceView::from(&snapshot)))
}

#[derive(Debug, Deserialize)]
struct ScheduleActionBody {
    instance_id: String,
    action: String,
    scheduled_time_unix_seconds: i64,
    reason: String,
}

async fn schedule_action(
    State(agent): State<Arc<Agent>>,
    Json(body): Json<ScheduleActionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = InstanceId::new(body.instance_id);
    let action = ScheduledAction {
        id: ActionId::generate(),
        action: match body.action.as_str() {
            "stop" => ActionKind::Stop,
            "start" => ActionKind::Start,
            other => return Err(AgentError::InvalidArgument(format!("unrecognized action: {other}")).into()),
        },
        scheduled_time: unix_to_system_time(body.scheduled_time_unix_seconds),
        reason: body.reason,
    };
    agent.schedule_action(&id, action).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn plugin_discover(State(agent): State<Arc<Agent>>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(agent.plugin_discover().await?))
}

async fn plugin_load(State(agent): State<Arc<Agent>>, Path(name): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    agent.plugin_load(&name).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Deserialize, Default)]
struct UnloadQuery {
    #[serde(default)]
    force: bool,
}

async fn plugin_unload(
    State(agent): State<Arc<Agent>>,
    Path(name): Path<String>,
    Query(query): Query<UnloadQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    agent.plugin_unload(&name, query.force).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Debug, Serialize)]
struct PluginView {
    plugin_name: String,
    plugin_version: String,
    api_version: String,
    capabilities: Vec<String>,
    health: String,
    restart_count: u32,
}

async fn plugin_info(State(agent): State<Arc<Agent>>) -> Json<Vec<PluginView>> {
    let plugins = agent.plugin_info().await;
    Json(
        plugins
            .into_iter()
            .map(|p| PluginView {
                plugin_name: p.plugin_name,
                plugin_version: p.plugin_version,
                api_version: p.api_version,
                capabilities: p.capabilities.into_iter().collect(),
                health: format!("{:?}", p.health).to_lowercase(),
                restart_count: p.restart_count,
            })
            .collect(),
    )
}

async fn auth_status(State(agent): State<Arc<Agent>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "enabled": agent.auth_status() }))
}

#[derive(Debug, Deserialize)]
struct IssueKeyBody {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    description: String,
}

async fn issue_api_key(
    State(agent): State<Arc<Agent>>,
    Path(plugin_name): Path<String>,
    Json(body): Json<IssueKeyBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let role = match body.role.as_deref() {
        Some("admin") => Role::Admin,
        _ => Role::CloudProvider,
    };
    let key = agent.issue_api_key(&plugin_name, role, &body.description)?;
    Ok(Json(serde_json::json!({ "api_key": key })))
}

async fn revoke_api_key(State(agent): State<Arc<Agent>>, Path(plugin_name): Path<String>) -> Result<Json<serde_json::Value>, ApiError> {
    let revoked = agent.revoke_api_key(&plugin_name)?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

//! Typed RPC ingress transport: implements the two `tonic`-generated
//! service traits by delegating straight to [`Agent`], the same core the
//! HTTP/JSON transport calls into.

use super::convert::*;
use crate::agent::Agent;
use crate::error::AgentError;
use snoozebot_proto::ingress::cloud_operation_service_server::CloudOperationService;
use snoozebot_proto::ingress::ingress_service_server::IngressService;
use snoozebot_proto::ingress::*;
use std::sync::Arc;
use std::time::SystemTime;
use tonic::{Request, Response, Status};

pub struct IngressGrpc {
    pub agent: Arc<Agent>,
}

#[tonic::async_trait]
impl IngressService for IngressGrpc {
    async fn register_instance(
        &self,
        request: Request<RegisterInstanceRequest>,
    ) -> Result<Response<RegisterInstanceResponse>, Status> {
        let req = request.into_inner();
        let registration = req
            .registration
            .ok_or_else(|| Status::invalid_argument("registration is required"))?;
        let id = instance_id(registration.instance_id.clone());
        let domain = registration_from_proto(registration);

        match self.agent.register(id, domain, SystemTime::now()).await {
            Ok(heartbeat_interval_seconds) => Ok(Response::new(RegisterInstanceResponse {
                ok: true,
                agent_id: self.agent.id.clone(),
                heartbeat_interval_seconds,
                error: String::new(),
            })),
            Err(e) => Ok(Response::new(RegisterInstanceResponse {
                ok: false,
                agent_id: String::new(),
                heartbeat_interval_seconds: 0,
                error: e.to_string(),
            })),
        }
    }

    async fn unregister_instance(
        &self,
        request: Request<UnregisterInstanceRequest>,
    ) -> Result<Response<UnregisterInstanceResponse>, Status> {
        let req = request.into_inner();
        let id = instance_id(req.instance_id);
        match self.agent.unregister(&id, req.force).await {
            Ok(()) => Ok(Response::new(UnregisterInstanceResponse { ok: true, error: String::new() })),
            Err(e) => Ok(Response::new(UnregisterInstanceResponse { ok: false, error: e.to_string() })),
        }
    }

    async fn send_idle_notification(
        &self,
        request: Request<SendIdleNotificationRequest>,
    ) -> Result<Response<SendIdleNotificationResponse>, Status> {
        let req = request.into_inner();
        let id = instance_id(req.instance_id);
        let now = SystemTime::now();
        let idle_since = unix_to_system_time(req.idle_since_unix_seconds);
        let idle_duration = std::time::Duration::from_secs(req.idle_duration_seconds);
        let usage = req.resource_usage.into_iter().map(|e| (e.resource, e.value)).collect();

        match self.agent.idle_notification(&id, idle_since, idle_duration, usage, now).await {
            Ok(outcome) => {
                let (decision, reason) = match &outcome.decision {
                    crate::policy::PolicyDecision::Wait { reason } => ("wait", reason.clone()),
                    crate::policy::PolicyDecision::Stop { reason, .. } => ("stop", reason.clone()),
                };
                Ok(Response::new(SendIdleNotificationResponse {
                    decision: decision.to_string(),
                    reason,
                    scheduled_action: outcome.scheduled_action.as_ref().map(scheduled_action_to_proto),
                    error: String::new(),
                }))
            }
            Err(e) => Ok(Response::new(SendIdleNotificationResponse {
                decision: "error".to_string(),
                reason: String::new(),
                scheduled_action: None,
                error: e.to_string(),
            })),
        }
    }

    async fn send_heartbeat(
        &self,
        request: Request<SendHeartbeatRequest>,
    ) -> Result<Response<SendHeartbeatResponse>, Status> {
        let req = request.into_inner();
        let id = instance_id(req.instance_id);
        let now = SystemTime::now();
        let timestamp = unix_to_system_time(req.timestamp_unix_seconds);
        let state = instance_state_from_str(&req.state)?;
        let usage = req.resource_usage.into_iter().map(|e| (e.resource, e.value)).collect();

        match self.agent.heartbeat(&id, timestamp, state, usage, now).await {
            Ok(outcome) => Ok(Response::new(SendHeartbeatResponse {
                acknowledged: outcome.acknowledged,
                commands: outcome.commands.iter().map(scheduled_action_to_proto).collect(),
                error: String::new(),
            })),
            Err(e) => Ok(Response::new(SendHeartbeatResponse {
                acknowledged: false,
                commands: vec![],
                error: e.to_string(),
            })),
        }
    }

    async fn report_state_change(
        &self,
        request: Request<ReportStateChangeRequest>,
    ) -> Result<Response<ReportStateChangeResponse>, Status> {
        let req = request.into_inner();
        let id = instance_id(req.instance_id);
        let current_state = instance_state_from_str(&req.current_state)?;
        match self.agent.report_state_change(&id, current_state, &req.reason, SystemTime::now()).await {
            Ok(()) => Ok(Response::new(ReportStateChangeResponse { acknowledged: true, error: String::new() })),
            Err(e) => Ok(Response::new(ReportStateChangeResponse { acknowledged: false, error: e.to_string() })),
        }
    }
}

pub struct CloudOperationsGrpc {
    pub agent: Arc<Agent>,
}

#[tonic::async_trait]
impl CloudOperationService for CloudOperationsGrpc {
    async fn get_instance_info(
        &self,
        request: Request<GetInstanceInfoRequest>,
    ) -> Result<Response<GetInstanceInfoResponse>, Status> {
        let req = request.into_inner();
        let id = instance_id(req.instance_id.clone());
        let snapshot = self.agent.get(&id).await?;
        let remote = self
            .agent
            .plugins
            .get_instance_info(&snapshot.registration.provider, &req.instance_id)
            .await?;
        Ok(Response::new(GetInstanceInfoResponse {
            info: Some(InstanceInfo {
                instance_id: remote.instance_id,
                provider: snapshot.registration.provider,
                state: remote.state,
                instance_type: remote.instance_type,
                region: remote.region,
                zone: remote.zone,
            }),
            error: String::new(),
        }))
    }

    async fn stop_instance(&self, request: Request<StopInstanceRequest>) -> Result<Response<CloudActionResponse>, Status> {
        let req = request.into_inner();
        let id = instance_id(req.instance_id.clone());
        let snapshot = self.agent.get(&id).await?;
        match self.agent.plugins.stop_instance(&snapshot.registration.provider, &req.instance_id).await {
            Ok(()) => Ok(Response::new(CloudActionResponse { ok: true, error: String::new() })),
            Err(e) => Ok(Response::new(CloudActionResponse { ok: false, error: e.to_string() })),
        }
    }

    async fn start_instance(&self, request: Request<StartInstanceRequest>) -> Result<Response<CloudActionResponse>, Status> {
        let req = request.into_inner();
        let id = instance_id(req.instance_id.clone());
        let snapshot = self.agent.get(&id).await?;
        match self.agent.plugins.start_instance(&snapshot.registration.provider, &req.instance_id).await {
            Ok(()) => Ok(Response::new(CloudActionResponse { ok: true, error: String::new() })),
            Err(e) => Ok(Response::new(CloudActionResponse { ok: false, error: e.to_string() })),
        }
    }

    async fn list_cloud_providers(
        &self,
        _request: Request<ListCloudProvidersRequest>,
    ) -> Result<Response<ListCloudProvidersResponse>, Status> {
        let providers = self.agent.plugin_info().await.into_iter().map(|p| p.plugin_name).collect();
        Ok(Response::new(ListCloudProvidersResponse { providers }))
    }

    async fn perform_cloud_action(
        &self,
        request: Request<PerformCloudActionRequest>,
    ) -> Result<Response<CloudActionResponse>, Status> {
        let req = request.into_inner();
        let id = instance_id(req.instance_id.clone());
        let snapshot = self.agent.get(&id).await?;
        let provider = &snapshot.registration.provider;
        let result = match req.action.as_str() {
            "stop" => self.agent.plugins.stop_instance(provider, &req.instance_id).await,
            "start" => self.agent.plugins.start_instance(provider, &req.instance_id).await,
            other => Err(AgentError::InvalidArgument(format!("unrecognized cloud action: {other}"))),
        };
        match result {
            Ok(()) => Ok(Response::new(CloudActionResponse { ok: true, error: String::new() })),
            Err(e) => Ok(Response::new(CloudActionResponse { ok: false, error: e.to_string() })),
        }
    }
}

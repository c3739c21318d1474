//! Snoozebot Agent daemon.
//!
//! Wires the Store, Security Pipeline, Plugin Runtime, Notification Pipeline,
//! and Agent core together, then serves both the HTTP/JSON and gRPC ingress
//! transports concurrently alongside the heartbeat/scheduled-action loop and
//! plugin supervision tick.

use clap::Parser;
use snoozebot_agent::agent::Agent;
use snoozebot_agent::config::AgentConfig;
use snoozebot_agent::ingress::{http_router, CloudOperationsGrpc, IngressGrpc};
use snoozebot_agent::notification::{LogSink, NotificationKind, NotificationManager};
use snoozebot_agent::plugin::PluginRuntime;
use snoozebot_agent::security::event_log::SecurityEventLog;
use snoozebot_agent::security::SecurityPipeline;
use snoozebot_agent::store::InMemoryStore;
use snoozebot_proto::ingress::cloud_operation_service_server::CloudOperationServiceServer;
use snoozebot_proto::ingress::ingress_service_server::IngressServiceServer;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tonic::transport::Server as GrpcServer;
use tracing::info;

#[derive(Parser)]
#[command(name = "snoozebotd")]
#[command(about = "Snoozebot Agent: hibernates and stops idle cloud compute instances")]
#[command(version)]
struct Cli {
    /// Path to agent.toml; falls back to /etc/snoozebot/config/agent.toml, then defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref())?;
    info!(listen_address = %config.listen_address, listen_port = config.listen_port, grpc_port = config.grpc_port, "starting snoozebot agent");

    let events = Arc::new(SecurityEventLog::new(
        config.security_log.path.clone(),
        config.security_log.max_bytes,
        config.security_log.max_rotations,
    ));
    let security = Arc::new(SecurityPipeline::new(&config, events)?);
    let store: Arc<dyn snoozebot_agent::store::Store> = Arc::new(InMemoryStore::new());
    let plugins = Arc::new(PluginRuntime::new(&config, security.clone()));

    let notifications = Arc::new(NotificationManager::new());
    notifications
        .register(
            Arc::new(LogSink::new("log")),
            BTreeSet::from([
                NotificationKind::Idle,
                NotificationKind::ScheduledAction,
                NotificationKind::ActionExecuted,
                NotificationKind::Error,
                NotificationKind::StateChange,
            ]),
        )
        .await;
    for (name, provider) in &config.notifications.providers {
        if !provider.enabled {
            continue;
        }
        if let Some(url) = provider.config.get("url") {
            notifications
                .register(
                    Arc::new(snoozebot_agent::notification::WebhookSink::new(name.clone(), url.clone())),
                    BTreeSet::from([
                        NotificationKind::Idle,
                        NotificationKind::ScheduledAction,
                        NotificationKind::ActionExecuted,
                        NotificationKind::Error,
                        NotificationKind::StateChange,
                    ]),
                )
                .await;
        }
    }

    let agent = Arc::new(Agent::new(config.clone(), store, plugins.clone(), security, notifications));

    tokio::spawn(agent.clone().run_heartbeat_loop());

    let supervision_plugins = plugins.clone();
    let supervision_tick = config.heartbeat_tick();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(supervision_tick);
        loop {
            interval.tick().await;
            supervision_plugins.supervise_tick().await;
        }
    });

    let http_addr: SocketAddr = format!("{}:{}", config.listen_address, config.listen_port).parse()?;
    let grpc_addr: SocketAddr = format!("{}:{}", config.listen_address, config.grpc_port).parse()?;

    let http_agent = agent.clone();
    let http_task = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(http_addr).await.expect("failed to bind HTTP listener");
        info!(addr = %http_addr, "HTTP ingress listening");
        axum::serve(listener, http_router(http_agent)).await.expect("HTTP server failed");
    });

    let grpc_agent = agent.clone();
    let grpc_task = tokio::spawn(async move {
        info!(addr = %grpc_addr, "gRPC ingress listening");
        GrpcServer::builder()
            .add_service(IngressServiceServer::new(IngressGrpc { agent: grpc_agent.clone() }))
            .add_service(CloudOperationServiceServer::new(CloudOperationsGrpc { agent: grpc_agent }))
            .serve(grpc_addr)
            .await
            .expect("gRPC server failed");
    });

    tokio::select! {
        result = http_task => result?,
        result = grpc_task => result?,
    }

    Ok(())
}

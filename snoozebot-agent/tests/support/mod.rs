//! Shared harness for integration tests: builds a fully wired `Agent` with
//! a temp-directory-backed config, the same way `agent.rs`'s own unit tests
//! do, but from outside the crate so these tests exercise only the public
//! surface a real binary would use.

use snoozebot_agent::config::AgentConfig;
use snoozebot_agent::notification::NotificationManager;
use snoozebot_agent::plugin::PluginRuntime;
use snoozebot_agent::security::event_log::SecurityEventLog;
use snoozebot_agent::security::SecurityPipeline;
use snoozebot_agent::store::{InMemoryStore, Store};
use snoozebot_agent::Agent;
use std::sync::Arc;

pub fn test_config() -> (AgentConfig, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AgentConfig::default();
    config.base_dir = dir.path().to_path_buf();
    config.plugin_dir = dir.path().join("plugins");
    config.security_log.path = dir.path().join("security.log");
    config.auth.auth_config = dir.path().join("config/auth.json");
    config.signature.signature_dir = dir.path().join("signatures");
    config.tls.cert_dir = dir.path().join("certs");
    (config, dir)
}

pub async fn build_agent(config: AgentConfig) -> Agent {
    let events = Arc::new(SecurityEventLog::new(
        config.security_log.path.clone(),
        config.security_log.max_bytes,
        config.security_log.max_rotations,
    ));
    let security = Arc::new(SecurityPipeline::new(&config, events).expect("security pipeline"));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let plugins = Arc::new(PluginRuntime::new(&config, security.clone()));
    let notifications = Arc::new(NotificationManager::new());
    Agent::new(config, store, plugins, security, notifications)
}

pub fn registration(provider: &str) -> snoozebot_agent::model::Registration {
    snoozebot_agent::model::Registration {
        instance_type: "t3.micro".to_string(),
        region: "us-east-1".to_string(),
        zone: "us-east-1a".to_string(),
        provider: provider.to_string(),
        metadata: vec![],
        nap_time_duration: std::time::Duration::from_secs(30 * 60),
    }
}

//! Plugin Runtime: discovers, verifies, spawns, and supervises
//! cloud-provider plugin subprocesses, and routes cloud operations to the
//! right loaded plugin, loading it on demand when it is not already
//! running.

use super::client::PluginClient;
use super::manifest::PluginManifest;
use super::process::{self, ExitStatus, PluginProcess, SpawnSpec};
use super::versioning::{self, Version};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::retry::{BackoffConfig, RetryExecutor};
use crate::security::event_log::{SecurityEvent, Severity};
use crate::security::SecurityPipeline;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// The host's own API version, checked against each plugin's declared
/// `min_host_version`.
pub const HOST_API_VERSION: &str = "1.0.0";
/// The lowest plugin minor version this host still accepts.
pub const MIN_COMPATIBLE_MINOR: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginHealth {
    Healthy,
    Restarting,
    Crashed,
    Unloading,
}

#[derive(Debug, Clone)]
pub struct LoadedPluginInfo {
    pub plugin_name: String,
    pub plugin_version: String,
    pub api_version: String,
    pub capabilities: BTreeSet<String>,
    pub health: PluginHealth,
    pub restart_count: u32,
}

struct LoadedPlugin {
    manifest: PluginManifest,
    process: Box<dyn PluginProcess>,
    client: PluginClient,
    health: PluginHealth,
    restart_count: u32,
}

pub struct PluginRuntime {
    plugin_dir: PathBuf,
    tls_cert_dir: PathBuf,
    handshake_timeout: Duration,
    connect_timeout: Duration,
    unload_grace: Duration,
    auth_api_key: Option<String>,
    security: Arc<SecurityPipeline>,
    plugins: RwLock<HashMap<String, Mutex<LoadedPlugin>>>,
}

impl PluginRuntime {
    pub fn new(config: &AgentConfig, security: Arc<SecurityPipeline>) -> Self {
        Self {
            plugin_dir: config.plugin_dir.clone(),
            tls_cert_dir: config.tls.cert_dir.clone(),
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            unload_grace: Duration::from_secs(10),
            auth_api_key: config.auth.api_key.clone(),
            security,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_loaded(&self, plugin_name: &str) -> bool {
        self.plugins.read().await.contains_key(plugin_name)
    }

    pub async fn loaded_plugins(&self) -> Vec<LoadedPluginInfo> {
        let plugins = self.plugins.read().await;
        let mut out = Vec::with_capacity(plugins.len());
        for (name, guard) in plugins.iter() {
            let p = guard.lock().await;
            out.push(LoadedPluginInfo {
                plugin_name: name.clone(),
                plugin_version: p.manifest.plugin_version.clone(),
                api_version: p.manifest.api_version.clone(),
                capabilities: p.manifest.capabilities.clone(),
                health: p.health,
                restart_count: p.restart_count,
            });
        }
        out
    }

    /// Lists candidate plugin binaries in `plugin_dir` that have not yet
    /// been loaded (a regular, executable file with a sibling
    /// `.manifest.json`; the same check the load path enforces as a gate,
    /// surfaced here for operators instead).
    pub async fn discover(&self) -> AgentResult<Vec<String>> {
        let loaded = self.plugins.read().await;
        let mut candidates = Vec::new();
        let entries = match std::fs::read_dir(&self.plugin_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(candidates),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if name.ends_with(".manifest.json") || name.ends_with(".sig.json") {
                continue;
            }
            if loaded.contains_key(name) {
                continue;
            }
            if self.plugin_dir.join(format!("{name}.manifest.json")).is_file() {
                candidates.push(name.to_string());
            }
        }
        candidates.sort();
        Ok(candidates)
    }

    /// On-demand load: a single attempt per `BackoffConfig::load_default`.
    pub async fn ensure_loaded(&self, plugin_name: &str) -> AgentResult<()> {
        if self.is_loaded(plugin_name).await {
            return Ok(());
        }
        let executor = RetryExecutor::new(BackoffConfig::load_default());
        executor.execute(|_attempt| self.load(plugin_name)).await
    }

    /// Full load sequence: discover manifest -> verify signature -> check
    /// version compatibility -> spawn -> handshake -> (optional) mTLS dial
    /// -> (optional) authenticate -> register.
    async fn load(&self, plugin_name: &str) -> AgentResult<()> {
        let binary_path = self.plugin_dir.join(plugin_name);
        let manifest_path = self.plugin_dir.join(format!("{plugin_name}.manifest.json"));

        let manifest_content = std::fs::read_to_string(&manifest_path)
            .map_err(|_| AgentError::NotFound(format!("no manifest for plugin {plugin_name}")))?;
        let manifest: PluginManifest = serde_json::from_str(&manifest_content)
            .map_err(|e| AgentError::InvalidArgument(format!("malformed manifest for plugin {plugin_name}: {e}")))?;

        if let Err(e) = self.security.verify_signature(plugin_name, &binary_path) {
            self.security.record_load_failure(plugin_name, "signature", &e);
            return Err(e);
        }

        let host_version = Version::parse(HOST_API_VERSION)?;
        let plugin_version = manifest.api_version()?;
        let min_host_version = manifest.min_host_version()?;
        if !versioning::is_compatible(host_version, plugin_version, MIN_COMPATIBLE_MINOR) {
            let e = AgentError::IncompatibleVersion(format!(
                "plugin {plugin_name} API version {} incompatible with host {HOST_API_VERSION}",
                manifest.api_version
            ));
            self.security.record_load_failure(plugin_name, "version", &e);
            return Err(e);
        }
        if !versioning::host_satisfies_minimum(host_version, min_host_version) {
            let e = AgentError::IncompatibleVersion(format!(
                "plugin {plugin_name} requires host >= {}, running {HOST_API_VERSION}",
                manifest.min_host_version
            ));
            self.security.record_load_failure(plugin_name, "version", &e);
            return Err(e);
        }

        let spec = SpawnSpec {
            binary_path: binary_path.clone(),
            env: HashMap::new(),
            handshake_timeout: self.handshake_timeout,
        };
        let mut process = process::spawn(&spec).await?;
        let handshake = process.handshake(self.handshake_timeout).await.inspect_err(|e| {
            self.security.record_load_failure(plugin_name, "handshake", e);
        })?;

        let mut client = PluginClient::connect(
            plugin_name,
            &handshake.address,
            &self.security,
            &self.tls_cert_dir,
            self.connect_timeout,
        )
        .await
        .inspect_err(|e| self.security.record_load_failure(plugin_name, "tls", e))?;

        if self.security.auth_enabled {
            let key = self.auth_api_key.as_deref().ok_or_else(|| {
                AgentError::AuthFailure("auth enabled but no host api_key configured".to_string())
            })?;
            if let Err(e) = client.authenticate(key).await {
                self.security.record_load_failure(plugin_name, "auth", &e);
                let _ = process.kill().await;
                return Err(e);
            }
        }

        info!(plugin = plugin_name, address = %handshake.address, "plugin loaded");
        self.register(plugin_name, manifest, Box::new(process), client).await;
        Ok(())
    }

    async fn register(
        &self,
        plugin_name: &str,
        manifest: PluginManifest,
        process: Box<dyn PluginProcess>,
        client: PluginClient,
    ) {
        let loaded = LoadedPlugin {
            manifest,
            process,
            client,
            health: PluginHealth::Healthy,
            restart_count: 0,
        };
        self.plugins
            .write()
            .await
            .insert(plugin_name.to_string(), Mutex::new(loaded));
    }

    /// Polls every loaded plugin's process once; crashed plugins are
    /// restarted under `BackoffConfig::restart_default`, or marked
    /// permanently `Crashed` once attempts are exhausted.
    pub async fn supervise_tick(&self) {
        let names: Vec<String> = self.plugins.read().await.keys().cloned().collect();
        for name in names {
            self.supervise_one(&name).await;
        }
    }

    async fn supervise_one(&self, plugin_name: &str) {
        let exited = {
            let plugins = self.plugins.read().await;
            let Some(guard) = plugins.get(plugin_name) else { return };
            let mut plugin = guard.lock().await;
            if plugin.health == PluginHealth::Unloading {
                return;
            }
            matches!(plugin.process.poll_exit().await, ExitStatus::Exited(_) | ExitStatus::Killed)
        };
        if !exited {
            return;
        }

        warn!(plugin = plugin_name, "plugin process exited unexpectedly, restarting");
        self.security.events.record(
            SecurityEvent::new("plugin", Severity::Warning, format!("plugin {plugin_name} crashed")).with_plugin(plugin_name),
        );

        let backoff = BackoffConfig::restart_default();
        let executor = RetryExecutor::new(backoff.clone());
        {
            let plugins = self.plugins.read().await;
            if let Some(guard) = plugins.get(plugin_name) {
                guard.lock().await.health = PluginHealth::Restarting;
            }
        }

        let result = executor.execute(|_attempt| self.load(plugin_name)).await;
        match result {
            Ok(()) => info!(plugin = plugin_name, "plugin restarted successfully"),
            Err(e) => {
                error!(plugin = plugin_name, error = %e, "plugin restart attempts exhausted");
                let plugins = self.plugins.read().await;
                if let Some(guard) = plugins.get(plugin_name) {
                    let mut p = guard.lock().await;
                    p.health = PluginHealth::Crashed;
                    p.restart_count += backoff.max_attempts;
                }
            }
        }
    }

    /// Graceful unload: RPC shutdown, wait for `unload_grace`, then force-kill.
    /// With `force=true`, unloading a not-loaded plugin is a no-op.
    pub async fn unload(&self, plugin_name: &str, force: bool) -> AgentResult<()> {
        let mut plugins = self.plugins.write().await;
        let Some(guard) = plugins.remove(plugin_name) else {
            if force {
                return Ok(());
            }
            return Err(AgentError::NotFound(format!("plugin {plugin_name} is not loaded")));
        };
        drop(plugins);

        let mut plugin = guard.into_inner();
        plugin.health = PluginHealth::Unloading;
        let _ = plugin.client.shutdown().await;

        let deadline = tokio::time::Instant::now() + self.unload_grace;
        loop {
            if matches!(plugin.process.poll_exit().await, ExitStatus::Exited(_) | ExitStatus::Killed) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(plugin = plugin_name, "grace period elapsed, force-terminating plugin");
                plugin.process.kill().await?;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        info!(plugin = plugin_name, "plugin unloaded");
        Ok(())
    }

    pub async fn stop_instance(&self, plugin_name: &str, instance_id: &str) -> AgentResult<()> {
        self.ensure_loaded(plugin_name).await?;
        let plugins = self.plugins.read().await;
        let guard = plugins
            .get(plugin_name)
            .ok_or_else(|| AgentError::PluginUnavailable(format!("plugin {plugin_name} not loaded")))?;
        let mut plugin = guard.lock().await;
        plugin.client.stop_instance(instance_id).await
    }

    pub async fn start_instance(&self, plugin_name: &str, instance_id: &str) -> AgentResult<()> {
        self.ensure_loaded(plugin_name).await?;
        let plugins = self.plugins.read().await;
        let guard = plugins
            .get(plugin_name)
            .ok_or_else(|| AgentError::PluginUnavailable(format!("plugin {plugin_name} not loaded")))?;
        let mut plugin = guard.lock().await;
        plugin.client.start_instance(instance_id).await
    }

    pub async fn get_instance_info(
        &self,
        plugin_name: &str,
        instance_id: &str,
    ) -> AgentResult<snoozebot_proto::plugin::InstanceInfo> {
        self.ensure_loaded(plugin_name).await?;
        let plugins = self.plugins.read().await;
        let guard = plugins
            .get(plugin_name)
            .ok_or_else(|| AgentError::PluginUnavailable(format!("plugin {plugin_name} not loaded")))?;
        let mut plugin = guard.lock().await;
        plugin.client.get_instance_info(instance_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_api_version_parses() {
        Version::parse(HOST_API_VERSION).unwrap();
    }
}

//! RPC stub to a loaded plugin's `CloudProviderPlugin` control channel.
//! Connects over the TCP address the plugin announced in its handshake,
//! optionally under mutual TLS.

use crate::error::{AgentError, AgentResult};
use crate::security::SecurityPipeline;
use snoozebot_proto::plugin::{
    cloud_provider_plugin_client::CloudProviderPluginClient, AuthenticateRequest, Empty, InstanceRef,
};
use std::time::Duration;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

pub struct PluginClient {
    plugin_name: String,
    inner: CloudProviderPluginClient<Channel>,
}

impl PluginClient {
    pub async fn connect(
        plugin_name: &str,
        address: &str,
        security: &SecurityPipeline,
        tls_cert_dir: &std::path::Path,
        connect_timeout: Duration,
    ) -> AgentResult<Self> {
        let url = format!("http://{address}");
        let mut endpoint = Endpoint::from_shared(url)
            .map_err(|e| AgentError::PluginUnavailable(format!("invalid plugin address {address}: {e}")))?
            .timeout(connect_timeout)
            .connect_timeout(connect_timeout);

        if security.tls_enabled {
            let ca_pem = std::fs::read_to_string(tls_cert_dir.join("ca").join("cert.pem"))
                .map_err(|e| AgentError::TlsFailure(format!("failed to read CA cert: {e}")))?;
            let agent_cert_pem = std::fs::read_to_string(tls_cert_dir.join("agent").join("cert.pem"))
                .map_err(|e| AgentError::TlsFailure(format!("failed to read agent cert: {e}")))?;
            let agent_key_pem = std::fs::read_to_string(tls_cert_dir.join("agent").join("key.pem"))
                .map_err(|e| AgentError::TlsFailure(format!("failed to read agent key: {e}")))?;

            let tls = ClientTlsConfig::new()
                .ca_certificate(Certificate::from_pem(ca_pem))
                .identity(Identity::from_pem(agent_cert_pem, agent_key_pem))
                .domain_name(plugin_name.to_string());
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| AgentError::TlsFailure(format!("failed to apply plugin TLS config: {e}")))?;
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| AgentError::PluginUnavailable(format!("failed to connect to plugin {plugin_name}: {e}")))?;

        Ok(Self {
            plugin_name: plugin_name.to_string(),
            inner: CloudProviderPluginClient::new(channel),
        })
    }

    pub async fn authenticate(&mut self, api_key: &str) -> AgentResult<()> {
        let response = self
            .inner
            .authenticate(AuthenticateRequest { api_key: api_key.to_string() })
            .await
            .map_err(|status| AgentError::AuthFailure(format!("plugin {} rejected authentication: {status}", self.plugin_name)))?
            .into_inner();
        if !response.ok {
            return Err(AgentError::AuthFailure(format!(
                "plugin {} authentication failed: {}",
                self.plugin_name, response.error
            )));
        }
        Ok(())
    }

    pub async fn provider_name(&mut self) -> AgentResult<String> {
        let response = self.inner.get_provider_name(Empty {}).await.map_err(status_to_error)?;
        Ok(response.into_inner().value)
    }

    pub async fn provider_version(&mut self) -> AgentResult<String> {
        let response = self.inner.get_provider_version(Empty {}).await.map_err(status_to_error)?;
        Ok(response.into_inner().value)
    }

    pub async fn api_version(&mut self) -> AgentResult<String> {
        let response = self.inner.get_api_version(Empty {}).await.map_err(status_to_error)?;
        Ok(response.into_inner().value)
    }

    pub async fn stop_instance(&mut self, instance_id: &str) -> AgentResult<()> {
        let response = self
            .inner
            .stop_instance(InstanceRef { instance_id: instance_id.to_string() })
            .await
            .map_err(status_to_error)?
            .into_inner();
        if !response.ok {
            return Err(AgentError::PluginUnavailable(format!("stop_instance failed: {}", response.error)));
        }
        Ok(())
    }

    pub async fn start_instance(&mut self, instance_id: &str) -> AgentResult<()> {
        let response = self
            .inner
            .start_instance(InstanceRef { instance_id: instance_id.to_string() })
            .await
            .map_err(status_to_error)?
            .into_inner();
        if !response.ok {
            return Err(AgentError::PluginUnavailable(format!("start_instance failed: {}", response.error)));
        }
        Ok(())
    }

    pub async fn get_instance_info(&mut self, instance_id: &str) -> AgentResult<snoozebot_proto::plugin::InstanceInfo> {
        let response = self
            .inner
            .get_instance_info(InstanceRef { instance_id: instance_id.to_string() })
            .await
            .map_err(status_to_error)?
            .into_inner();
        response
            .info
            .ok_or_else(|| AgentError::PluginUnavailable("plugin returned empty instance info".to_string()))
    }

    pub async fn shutdown(&mut self) -> AgentResult<()> {
        self.inner.shutdown(Empty {}).await.map_err(status_to_error)?;
        Ok(())
    }
}

fn status_to_error(status: tonic::Status) -> AgentError {
    AgentError::PluginUnavailable(format!("plugin RPC failed: {status}"))
}

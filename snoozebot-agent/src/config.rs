//! Agent configuration: layered `env > file (TOML) > defaults`, validated
//! after merge.

use crate::error::{AgentError, AgentResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub listen_address: String,
    pub listen_port: u16,
    pub grpc_port: u16,
    pub plugin_dir: PathBuf,
    pub idle_timeout_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_tick_ms: u64,
    pub stop_delay_seconds: u64,

    pub tls: TlsSection,
    pub signature: SignatureSection,
    pub auth: AuthSection,
    pub notifications: NotificationsSection,
    pub security_log: SecurityLogSection,

    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSection {
    pub enabled: bool,
    pub cert_dir: PathBuf,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub ca_file: Option<String>,
    pub skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSection {
    pub enabled: bool,
    pub signature_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    pub enabled: bool,
    pub auth_config: PathBuf,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationsSection {
    pub providers: std::collections::BTreeMap<String, NotificationProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationProviderConfig {
    pub enabled: bool,
    #[serde(default)]
    pub config: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLogSection {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_rotations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let base_dir = PathBuf::from("/etc/snoozebot");
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 8080,
            grpc_port: 9090,
            plugin_dir: base_dir.join("plugins"),
            idle_timeout_seconds: 30 * 60,
            heartbeat_interval_seconds: 30,
            heartbeat_tick_ms: 1000,
            stop_delay_seconds: 5 * 60,
            tls: TlsSection {
                enabled: false,
                cert_dir: base_dir.join("certs"),
                cert_file: None,
                key_file: None,
                ca_file: None,
                skip_verify: false,
            },
            signature: SignatureSection {
                enabled: false,
                signature_dir: base_dir.join("signatures"),
            },
            auth: AuthSection {
                enabled: false,
                auth_config: base_dir.join("config/auth.json"),
                api_key: None,
            },
            notifications: NotificationsSection::default(),
            security_log: SecurityLogSection {
                path: base_dir.join("security.log"),
                max_bytes: 10 * 1024 * 1024,
                max_rotations: 5,
            },
            base_dir,
        }
    }
}

impl AgentConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        // Default heartbeat_timeout = 3x advertised heartbeat interval.
        Duration::from_secs(self.heartbeat_interval_seconds * 3)
    }

    pub fn heartbeat_tick(&self) -> Duration {
        Duration::from_millis(self.heartbeat_tick_ms.max(100))
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_secs(self.stop_delay_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Loading hierarchy: env > file > defaults.
    pub fn load(path: Option<&Path>) -> AgentResult<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(_) => Self::default(),
            None => {
                let default_path = PathBuf::from("/etc/snoozebot/config/agent.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> AgentResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::InvalidArgument(format!("failed to read config {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| AgentError::InvalidArgument(format!("failed to parse config {}: {e}", path.display())))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SNOOZEBOT_LISTEN_ADDRESS") {
            self.listen_address = v;
        }
        if let Ok(v) = std::env::var("SNOOZEBOT_LISTEN_PORT") {
            if let Ok(port) = v.parse() {
                self.listen_port = port;
            }
        }
        if let Ok(v) = std::env::var("SNOOZEBOT_PLUGIN_DIR") {
            self.plugin_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SNOOZEBOT_IDLE_TIMEOUT") {
            if let Ok(secs) = v.parse() {
                self.idle_timeout_seconds = secs;
            }
        }
        if let Ok(v) = std::env::var("SNOOZEBOT_HEARTBEAT_INTERVAL") {
            if let Ok(secs) = v.parse() {
                self.heartbeat_interval_seconds = secs;
            }
        }
        if let Ok(v) = std::env::var("SNOOZEBOT_TLS_ENABLED") {
            self.tls.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SNOOZEBOT_SIGNATURE_ENABLED") {
            self.signature.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SNOOZEBOT_AUTH_ENABLED") {
            self.auth.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("SNOOZEBOT_API_KEY") {
            self.auth.api_key = Some(v);
        }
    }

    fn validate(&self) -> AgentResult<()> {
        if self.heartbeat_tick_ms < 100 {
            return Err(AgentError::InvalidArgument(
                "heartbeat_tick_ms floor is 100ms".to_string(),
            ));
        }
        if self.tls.enabled && self.tls.cert_file.is_none() {
            return Err(AgentError::InvalidArgument(
                "tls.cert_file is required when tls.enabled=true".to_string(),
            ));
        }
        if self.auth.enabled && self.auth.api_key.is_none() && !self.auth.auth_config.exists() {
            // A missing auth config is only fatal once auth is actually
            // exercised; loading still succeeds so the setup tool can create it.
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AgentConfig::default().validate().unwrap();
    }

    #[test]
    fn heartbeat_timeout_is_three_times_interval() {
        let config = AgentConfig::default();
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(config.heartbeat_interval_seconds * 3));
    }

    #[test]
    fn tls_enabled_without_cert_file_fails_validation() {
        let mut config = AgentConfig::default();
        config.tls.enabled = true;
        assert!(config.validate().is_err());
    }
}

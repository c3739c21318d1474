//! API-key authorization gate: a key is looked up by `plugin_name`,
//! hash-compared, and its role resolved to the permissions required by
//! the requested operation.

use crate::error::{AgentError, AgentResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CloudOperations,
    FilesystemRead,
    FilesystemWrite,
    NetworkOutbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    CloudProvider,
    Admin,
}

impl Role {
    /// Built-in role `cloud_provider` grants
    /// `{cloud_operations, filesystem_read, network_outbound}` and denies
    /// `filesystem_write`.
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::CloudProvider => &[
                Permission::CloudOperations,
                Permission::FilesystemRead,
                Permission::NetworkOutbound,
            ],
            Role::Admin => &[
                Permission::CloudOperations,
                Permission::FilesystemRead,
                Permission::FilesystemWrite,
                Permission::NetworkOutbound,
            ],
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// An issued API key. The plaintext key is never persisted after issuance;
/// only its hash lives in the auth config on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub plugin_name: String,
    pub key_hash: String,
    pub role: Role,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Keyed by plugin_name, mirroring "API key looked up by plugin_name".
    pub keys: BTreeMap<String, ApiKeyRecord>,
}

impl AuthConfig {
    pub fn load(path: &Path) -> AgentResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::internal(format!("failed to read auth config: {e}")))?;
        serde_json::from_str(&content).map_err(|e| AgentError::internal(format!("failed to parse auth config: {e}")))
    }

    pub fn save(&self, path: &Path) -> AgentResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::internal(format!("failed to create auth config dir: {e}")))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AgentError::internal(format!("failed to serialize auth config: {e}")))?;
        std::fs::write(path, content).map_err(|e| AgentError::internal(format!("failed to write auth config: {e}")))
    }

    pub fn issue(&mut self, plugin_name: &str, role: Role, description: &str, ttl_seconds: Option<i64>) -> String {
        let plaintext = format!("sb_{}", uuid::Uuid::new_v4().simple());
        let now = chrono::Utc::now().timestamp();
        self.keys.insert(
            plugin_name.to_string(),
            ApiKeyRecord {
                plugin_name: plugin_name.to_string(),
                key_hash: hash_key(&plaintext),
                role,
                created_at: now,
                expires_at: ttl_seconds.map(|ttl| now + ttl),
                description: description.to_string(),
            },
        );
        plaintext
    }

    pub fn revoke(&mut self, plugin_name: &str) -> bool {
        self.keys.remove(plugin_name).is_some()
    }
}

pub fn hash_key(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Authorization gate: authenticate the plaintext key presented by a
/// plugin call against the record bound to `plugin_name`, then confirm
/// the role grants `required`.
pub fn authenticate(config: &AuthConfig, plugin_name: &str, presented_key: &str, required: Permission) -> AgentResult<Role> {
    let record = config
        .keys
        .get(plugin_name)
        .ok_or_else(|| AgentError::AuthFailure(format!("no API key bound to plugin {plugin_name}")))?;

    if hash_key(presented_key) != record.key_hash {
        return Err(AgentError::AuthFailure(format!("API key mismatch for plugin {plugin_name}")));
    }

    if let Some(expires_at) = record.expires_at {
        if chrono::Utc::now().timestamp() > expires_at {
            return Err(AgentError::AuthFailure(format!("API key for plugin {plugin_name} has expired")));
        }
    }

    if !record.role.grants(required) {
        return Err(AgentError::PermissionDenied(format!(
            "role {:?} does not grant {:?}",
            record.role, required
        )));
    }

    Ok(record.role.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_provider_role_denies_filesystem_write() {
        assert!(!Role::CloudProvider.grants(Permission::FilesystemWrite));
        assert!(Role::CloudProvider.grants(Permission::CloudOperations));
    }

    #[test]
    fn issued_key_authenticates_and_checks_permission() {
        let mut config = AuthConfig::default();
        let key = config.issue("aws", Role::CloudProvider, "test key", None);

        authenticate(&config, "aws", &key, Permission::CloudOperations).unwrap();
        let denied = authenticate(&config, "aws", &key, Permission::FilesystemWrite);
        assert!(matches!(denied, Err(AgentError::PermissionDenied(_))));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let mut config = AuthConfig::default();
        config.issue("aws", Role::CloudProvider, "test key", None);
        let result = authenticate(&config, "aws", "wrong-key", Permission::CloudOperations);
        assert!(matches!(result, Err(AgentError::AuthFailure(_))));
    }

    #[test]
    fn revoke_removes_the_binding() {
        let mut config = AuthConfig::default();
        let key = config.issue("aws", Role::CloudProvider, "test key", None);
        assert!(config.revoke("aws"));
        let result = authenticate(&config, "aws", &key, Permission::CloudOperations);
        assert!(matches!(result, Err(AgentError::AuthFailure(_))));
    }
}

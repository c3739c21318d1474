//! First-run setup: generates the CA, per-plugin leaf certificates, a
//! signing keypair, and an initial API key under the configured base
//! directory. Exercised by the `snoozebot-setup` binary; kept as a library
//! module so it is unit-testable without spawning a process.

use crate::error::{AgentError, AgentResult};
use crate::security::auth::{AuthConfig, Role};
use crate::security::signature::SigningKeyRecord;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, Issuer, KeyPair};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Exit codes, reused verbatim by the `snoozebot-setup` binary.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERIC_FAILURE: i32 = 1;
    pub const CONFIG_INVALID: i32 = 2;
    pub const CRYPTO_MATERIAL_MISSING: i32 = 3;
}

/// Base directory layout, relative to a configurable root (default
/// `/etc/snoozebot`).
pub struct Layout {
    pub base_dir: PathBuf,
}

impl Layout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn ca_dir(&self) -> PathBuf {
        self.base_dir.join("certs/ca")
    }

    pub fn plugin_cert_dir(&self, plugin_name: &str) -> PathBuf {
        self.base_dir.join("certs").join(plugin_name)
    }

    pub fn signature_dir(&self) -> PathBuf {
        self.base_dir.join("signatures")
    }

    pub fn signature_keys_dir(&self) -> PathBuf {
        self.signature_dir().join("keys")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn auth_config_path(&self) -> PathBuf {
        self.config_dir().join("auth.json")
    }
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Issues certificates from a self-signed CA generated on first
/// initialization; per-plugin leaf certificates are named by plugin.
/// Writes `certs/ca/{cert.pem,key.pem}` plus one leaf pair per name in
/// `plugin_names`, including a leaf for the Agent itself so
/// [`crate::plugin::client::PluginClient`] can dial under mutual TLS.
pub fn generate_ca_and_certs(layout: &Layout, plugin_names: &[String]) -> AgentResult<()> {
    let mut ca_params = CertificateParams::new(Vec::new())
        .map_err(|e| AgentError::internal(format!("failed to build CA cert params: {e}")))?;
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    ca_params.distinguished_name = {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "snoozebot-ca");
        dn
    };
    let ca_key = KeyPair::generate().map_err(|e| AgentError::internal(format!("failed to generate CA key: {e}")))?;
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .map_err(|e| AgentError::internal(format!("failed to self-sign CA cert: {e}")))?;

    write_pem_pair(&layout.ca_dir(), ca_cert.pem(), ca_key.serialize_pem())?;

    let issuer = Issuer::new(ca_params, ca_key.clone());
    for name in std::iter::once(&"agent".to_string()).chain(plugin_names.iter()) {
        issue_leaf_cert(layout, name, &issuer)?;
    }
    Ok(())
}

fn issue_leaf_cert(layout: &Layout, common_name: &str, issuer: &Issuer<'_, KeyPair>) -> AgentResult<()> {
    let mut params = CertificateParams::new(vec![common_name.to_string()])
        .map_err(|e| AgentError::internal(format!("failed to build leaf cert params for {common_name}: {e}")))?;
    params.distinguished_name = {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn
    };
    let key = KeyPair::generate().map_err(|e| AgentError::internal(format!("failed to generate key for {common_name}: {e}")))?;
    let cert = params
        .signed_by(&key, issuer)
        .map_err(|e| AgentError::internal(format!("failed to sign leaf cert for {common_name}: {e}")))?;
    write_pem_pair(&layout.plugin_cert_dir(common_name), cert.pem(), key.serialize_pem())
}

fn write_pem_pair(dir: &Path, cert_pem: String, key_pem: String) -> AgentResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| AgentError::internal(format!("failed to create {}: {e}", dir.display())))?;
    std::fs::write(dir.join("cert.pem"), cert_pem).map_err(|e| AgentError::internal(format!("failed to write cert.pem: {e}")))?;
    std::fs::write(dir.join("key.pem"), key_pem).map_err(|e| AgentError::internal(format!("failed to write key.pem: {e}")))?;
    Ok(())
}

/// Generates an ed25519 signing keypair, trusts it immediately, and writes
/// the public
/// half under `signatures/keys/<key_id>.pub` as a [`SigningKeyRecord`] the
/// [`crate::security::signature::KeyRegistry`] loader can read back. Returns
/// the private key so the caller can sign plugin binaries without a second
/// round trip through disk.
pub fn generate_signing_key(layout: &Layout, name: &str, ttl_seconds: i64) -> AgentResult<(SigningKey, String)> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let key_id = uuid::Uuid::new_v4().to_string();
    let now = unix_now();

    let record = SigningKeyRecord {
        key_id: key_id.clone(),
        public_key_bytes: signing_key.verifying_key().to_bytes().to_vec(),
        name: name.to_string(),
        created_at: now,
        expires_at: now + ttl_seconds,
        revoked: false,
        trusted: true,
    };

    let dir = layout.signature_keys_dir();
    std::fs::create_dir_all(&dir).map_err(|e| AgentError::internal(format!("failed to create signature key dir: {e}")))?;
    let content = serde_json::to_string_pretty(&record)
        .map_err(|e| AgentError::internal(format!("failed to serialize signing key record: {e}")))?;
    std::fs::write(dir.join(format!("{key_id}.pub")), content)
        .map_err(|e| AgentError::internal(format!("failed to write signing key record: {e}")))?;

    Ok((signing_key, key_id))
}

/// Issues one `cloud_provider` API key per named plugin and persists the
/// auth config the security pipeline
/// loads at startup. Returns the plaintext keys (never persisted) keyed by
/// plugin name, so the operator can hand them to each plugin's environment.
pub fn issue_initial_api_keys(layout: &Layout, plugin_names: &[String]) -> AgentResult<Vec<(String, String)>> {
    let mut auth = AuthConfig::default();
    let mut issued = Vec::with_capacity(plugin_names.len());
    for name in plugin_names {
        let key = auth.issue(name, Role::CloudProvider, "issued by snoozebot-setup", None);
        issued.push((name.clone(), key));
    }
    auth.save(&layout.auth_config_path())?;
    Ok(issued)
}

/// Full first-run sequence: CA + leaf certs, one trusted signing key, and
/// one API key per named plugin. Idempotent in layout (re-running overwrites
/// prior material), matching a setup wizard's "generate on first run" role.
pub fn run(base_dir: &Path, plugin_names: &[String]) -> AgentResult<SetupSummary> {
    let layout = Layout::new(base_dir);
    generate_ca_and_certs(&layout, plugin_names)?;
    let (_signing_key, key_id) = generate_signing_key(&layout, "snoozebot-setup", 365 * 24 * 3600)?;
    let api_keys = issue_initial_api_keys(&layout, plugin_names)?;
    Ok(SetupSummary {
        base_dir: layout.base_dir,
        signing_key_id: key_id,
        api_keys,
    })
}

pub struct SetupSummary {
    pub base_dir: PathBuf,
    pub signing_key_id: String,
    pub api_keys: Vec<(String, String)>,
}

/// Used by `snoozebot-setup` to sign a plugin binary with material this
/// module just generated, producing the JSON signature sidecar.
pub fn sign_plugin_binary(
    layout: &Layout,
    signing_key: &SigningKey,
    key_id: &str,
    plugin_name: &str,
    plugin_version: &str,
    binary_path: &Path,
    ttl_seconds: i64,
) -> AgentResult<()> {
    use ed25519_dalek::Signer;
    use sha2::{Digest, Sha256};

    let binary = std::fs::read(binary_path)
        .map_err(|e| AgentError::internal(format!("failed to read plugin binary {}: {e}", binary_path.display())))?;
    let digest = {
        let mut hasher = Sha256::new();
        hasher.update(&binary);
        hasher.finalize()
    };
    let sig = signing_key.sign(&digest);
    let now = unix_now();

    let signature = crate::security::signature::PluginSignature {
        version: 1,
        plugin_name: plugin_name.to_string(),
        plugin_version: plugin_version.to_string(),
        hash_alg: "sha256".to_string(),
        hash_b64: BASE64.encode(digest),
        sig_b64: BASE64.encode(sig.to_bytes()),
        sig_alg: "ed25519".to_string(),
        key_id: key_id.to_string(),
        issuer: "snoozebot-ca".to_string(),
        created_at: now,
        expires_at: now + ttl_seconds,
    };

    let dir = layout.signature_dir();
    std::fs::create_dir_all(&dir).map_err(|e| AgentError::internal(format!("failed to create signature dir: {e}")))?;
    let content = serde_json::to_string_pretty(&signature)
        .map_err(|e| AgentError::internal(format!("failed to serialize signature: {e}")))?;
    std::fs::write(dir.join(format!("{plugin_name}.sig.json")), content)
        .map_err(|e| AgentError::internal(format!("failed to write signature sidecar: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_ca_and_leaf_certs_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        generate_ca_and_certs(&layout, &["aws".to_string()]).unwrap();

        assert!(layout.ca_dir().join("cert.pem").exists());
        assert!(layout.ca_dir().join("key.pem").exists());
        assert!(layout.plugin_cert_dir("agent").join("cert.pem").exists());
        assert!(layout.plugin_cert_dir("aws").join("cert.pem").exists());
    }

    #[test]
    fn issues_initial_api_keys_and_persists_auth_config() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let issued = issue_initial_api_keys(&layout, &["aws".to_string(), "gcp".to_string()]).unwrap();

        assert_eq!(issued.len(), 2);
        let reloaded = AuthConfig::load(&layout.auth_config_path()).unwrap();
        assert!(reloaded.keys.contains_key("aws"));
        assert!(reloaded.keys.contains_key("gcp"));
    }

    #[test]
    fn signing_key_round_trips_through_registry_loader() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        let (_key, key_id) = generate_signing_key(&layout, "test", 3600).unwrap();

        let registry = crate::security::signature::KeyRegistry::load_dir(&layout.signature_keys_dir()).unwrap();
        let record = registry.get(&key_id).unwrap();
        assert!(record.trusted);
        assert!(!record.revoked);
    }

    #[test]
    fn full_setup_run_produces_one_key_per_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(dir.path(), &["aws".to_string(), "gcp".to_string()]).unwrap();
        assert_eq!(summary.api_keys.len(), 2);
        assert!(!summary.signing_key_id.is_empty());
    }
}

//! Plugin signature gate. Verifies a sidecar JSON manifest against a
//! registry of trusted signing keys before a plugin binary is ever
//! spawned.

use crate::error::{AgentError, AgentResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// A trusted signing key available for plugin signature verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    pub key_id: String,
    pub public_key_bytes: Vec<u8>,
    pub name: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
    pub trusted: bool,
}

impl SigningKeyRecord {
    /// A key is eligible for verification iff trusted, not revoked, and
    /// not yet expired.
    pub fn eligible(&self, now_unix: i64) -> bool {
        self.trusted && !self.revoked && now_unix <= self.expires_at
    }
}

/// Per-plugin JSON signature sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSignature {
    pub version: u32,
    pub plugin_name: String,
    pub plugin_version: String,
    pub hash_alg: String,
    pub hash_b64: String,
    pub sig_b64: String,
    pub sig_alg: String,
    pub key_id: String,
    pub issuer: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Default)]
pub struct KeyRegistry {
    keys: HashMap<String, SigningKeyRecord>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: SigningKeyRecord) {
        self.keys.insert(key.key_id.clone(), key);
    }

    pub fn get(&self, key_id: &str) -> Option<&SigningKeyRecord> {
        self.keys.get(key_id)
    }

    pub fn load_dir(dir: &Path) -> AgentResult<Self> {
        let mut registry = Self::new();
        if !dir.exists() {
            return Ok(registry);
        }
        for entry in std::fs::read_dir(dir)
            .map_err(|e| AgentError::internal(format!("failed to read key dir: {e}")))?
        {
            let entry = entry.map_err(|e| AgentError::internal(format!("dir entry error: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| AgentError::internal(format!("failed to read key file: {e}")))?;
                let key: SigningKeyRecord = serde_json::from_str(&content)
                    .map_err(|e| AgentError::internal(format!("failed to parse key file: {e}")))?;
                registry.insert(key);
            }
        }
        Ok(registry)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Recompute the hash over the binary, compare, then verify `sig` against
/// the key identified by `key_id`, rejecting untrusted, revoked, or
/// expired keys and expired signatures.
pub fn verify_plugin_signature(
    binary: &[u8],
    signature: &PluginSignature,
    keys: &KeyRegistry,
) -> AgentResult<()> {
    let now = unix_now();

    if now >= signature.expires_at {
        return Err(AgentError::SignatureExpired(format!(
            "signature for {} expired at {}",
            signature.plugin_name, signature.expires_at
        )));
    }

    let key = keys
        .get(&signature.key_id)
        .ok_or_else(|| AgentError::KeyUntrusted(format!("unknown key id {}", signature.key_id)))?;

    if key.revoked {
        return Err(AgentError::KeyRevoked(format!("key {} is revoked", key.key_id)));
    }
    if !key.trusted {
        return Err(AgentError::KeyUntrusted(format!("key {} is not trusted", key.key_id)));
    }
    if now > key.expires_at {
        return Err(AgentError::KeyUntrusted(format!("key {} has expired", key.key_id)));
    }

    if signature.hash_alg != "sha256" {
        return Err(AgentError::SignatureInvalid(format!(
            "unsupported hash_alg {}",
            signature.hash_alg
        )));
    }
    let expected_digest = BASE64
        .decode(&signature.hash_b64)
        .map_err(|e| AgentError::SignatureInvalid(format!("invalid hash_b64: {e}")))?;
    let computed_digest = hex::decode(sha256_hex(binary)).expect("hex::encode output is valid hex");
    if expected_digest != computed_digest {
        return Err(AgentError::SignatureInvalid(
            "binary hash does not match signature".to_string(),
        ));
    }

    if signature.sig_alg != "ed25519" {
        return Err(AgentError::SignatureInvalid(format!(
            "unsupported sig_alg {}",
            signature.sig_alg
        )));
    }
    let verifying_key = VerifyingKey::try_from(key.public_key_bytes.as_slice())
        .map_err(|e| AgentError::SignatureInvalid(format!("malformed public key: {e}")))?;
    let sig_bytes = BASE64
        .decode(&signature.sig_b64)
        .map_err(|e| AgentError::SignatureInvalid(format!("invalid sig_b64: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| AgentError::SignatureInvalid("signature must be 64 bytes".to_string()))?;
    let sig = Signature::from_bytes(&sig_array);

    verifying_key
        .verify(&computed_digest, &sig)
        .map_err(|_| AgentError::SignatureInvalid(format!("signature verification failed for {}", signature.plugin_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn build_signature(binary: &[u8], signing_key: &SigningKey, key_id: &str, expires_at: i64) -> PluginSignature {
        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(binary);
            hasher.finalize()
        };
        let sig = signing_key.sign(&digest);
        PluginSignature {
            version: 1,
            plugin_name: "aws".to_string(),
            plugin_version: "1.0.0".to_string(),
            hash_alg: "sha256".to_string(),
            hash_b64: BASE64.encode(digest),
            sig_b64: BASE64.encode(sig.to_bytes()),
            sig_alg: "ed25519".to_string(),
            key_id: key_id.to_string(),
            issuer: "snoozebot-ca".to_string(),
            created_at: unix_now(),
            expires_at,
        }
    }

    #[test]
    fn valid_signature_verifies() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let binary = b"plugin binary bytes";
        let signature = build_signature(binary, &signing_key, "key-1", unix_now() + 3600);
        let mut registry = KeyRegistry::new();
        registry.insert(SigningKeyRecord {
            key_id: "key-1".into(),
            public_key_bytes: signing_key.verifying_key().to_bytes().to_vec(),
            name: "test key".into(),
            created_at: unix_now(),
            expires_at: unix_now() + 7200,
            revoked: false,
            trusted: true,
        });

        verify_plugin_signature(binary, &signature, &registry).unwrap();
    }

    #[test]
    fn single_flipped_byte_fails_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let binary = b"plugin binary bytes".to_vec();
        let signature = build_signature(&binary, &signing_key, "key-1", unix_now() + 3600);
        let mut registry = KeyRegistry::new();
        registry.insert(SigningKeyRecord {
            key_id: "key-1".into(),
            public_key_bytes: signing_key.verifying_key().to_bytes().to_vec(),
            name: "test key".into(),
            created_at: unix_now(),
            expires_at: unix_now() + 7200,
            revoked: false,
            trusted: true,
        });

        let mut tampered = binary.clone();
        tampered[0] ^= 0x01;
        assert!(verify_plugin_signature(&tampered, &signature, &registry).is_err());
    }

    #[test]
    fn revoked_key_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let binary = b"plugin binary bytes";
        let signature = build_signature(binary, &signing_key, "key-1", unix_now() + 3600);
        let mut registry = KeyRegistry::new();
        registry.insert(SigningKeyRecord {
            key_id: "key-1".into(),
            public_key_bytes: signing_key.verifying_key().to_bytes().to_vec(),
            name: "test key".into(),
            created_at: unix_now(),
            expires_at: unix_now() + 7200,
            revoked: true,
            trusted: true,
        });

        assert!(matches!(
            verify_plugin_signature(binary, &signature, &registry),
            Err(AgentError::KeyRevoked(_))
        ));
    }

    #[test]
    fn expiry_equal_to_now_is_rejected() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let binary = b"plugin binary bytes";
        let signature = build_signature(binary, &signing_key, "key-1", unix_now());
        let mut registry = KeyRegistry::new();
        registry.insert(SigningKeyRecord {
            key_id: "key-1".into(),
            public_key_bytes: signing_key.verifying_key().to_bytes().to_vec(),
            name: "test key".into(),
            created_at: unix_now(),
            expires_at: unix_now() + 7200,
            revoked: false,
            trusted: true,
        });

        assert!(matches!(
            verify_plugin_signature(binary, &signature, &registry),
            Err(AgentError::SignatureExpired(_))
        ));
    }
}

//! Security Event Log: an append-only rotating JSON-lines log of
//! authz/TLS/signature/plugin-lifecycle events, independent of
//! `tracing`'s own output so operators can ship one artifact to an audit
//! pipeline without parsing general application logs.

use crate::error::{AgentError, AgentResult};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: String,
    pub category: String,
    pub severity: Severity,
    pub plugin_name: Option<String>,
    pub message: String,
}

impl SecurityEvent {
    pub fn new(category: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            category: category.into(),
            severity,
            plugin_name: None,
            message: message.into(),
        }
    }

    pub fn with_plugin(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = Some(plugin_name.into());
        self
    }
}

pub struct SecurityEventLog {
    path: PathBuf,
    max_bytes: u64,
    max_rotations: u32,
    inner: Mutex<()>,
}

impl SecurityEventLog {
    pub fn new(path: PathBuf, max_bytes: u64, max_rotations: u32) -> Self {
        Self {
            path,
            max_bytes,
            max_rotations,
            inner: Mutex::new(()),
        }
    }

    pub fn record(&self, event: SecurityEvent) {
        let _guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.append_locked(&event) {
            warn!(error = %e, "failed to write security event log entry");
        }
    }

    fn append_locked(&self, event: &SecurityEvent) -> AgentResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| AgentError::internal(format!("failed to create security log dir: {e}")))?;
        }
        self.rotate_if_needed()?;

        let line = serde_json::to_string(event).map_err(|e| AgentError::internal(format!("failed to serialize security event: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AgentError::internal(format!("failed to open security log: {e}")))?;
        writeln!(file, "{line}").map_err(|e| AgentError::internal(format!("failed to write security log: {e}")))
    }

    fn rotate_if_needed(&self) -> AgentResult<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.max_bytes {
            return Ok(());
        }

        for index in (1..self.max_rotations).rev() {
            let from = rotated_path(&self.path, index);
            let to = rotated_path(&self.path, index + 1);
            if from.exists() {
                let _ = fs::rename(&from, &to);
            }
        }
        let first_rotation = rotated_path(&self.path, 1);
        fs::rename(&self.path, &first_rotation).map_err(|e| AgentError::internal(format!("failed to rotate security log: {e}")))
    }
}

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let mut os = base.as_os_str().to_owned();
    os.push(format!(".{index}"));
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.log");
        let log = SecurityEventLog::new(path.clone(), 10 * 1024 * 1024, 5);

        log.record(SecurityEvent::new("signature", Severity::Warning, "bad signature").with_plugin("aws"));
        log.record(SecurityEvent::new("tls", Severity::Critical, "skip_verify enabled"));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: SecurityEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.category, "signature");
        assert_eq!(parsed.plugin_name.as_deref(), Some("aws"));
    }

    #[test]
    fn rotates_when_over_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.log");
        let log = SecurityEventLog::new(path.clone(), 64, 3);

        for i in 0..20 {
            log.record(SecurityEvent::new("plugin", Severity::Info, format!("event {i} padding padding padding")));
        }

        assert!(path.exists());
        assert!(rotated_path(&path, 1).exists());
    }
}

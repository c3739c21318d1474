//! Subprocess plugin process model. The `PluginProcess` spawn/wait/kill
//! surface is behind a trait so tests can substitute an in-memory fake
//! without spawning real OS processes.

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// The go-plugin-style handshake line a plugin prints to stdout once its
/// control channel is ready: `<magic_cookie>|<protocol_version>|<api_version>|tcp|<host:port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFrame {
    pub magic_cookie: String,
    pub protocol_version: u32,
    pub api_version: String,
    pub network: String,
    pub address: String,
}

pub const EXPECTED_MAGIC_COOKIE: &str = "SNOOZEBOT_PLUGIN";
pub const HOST_PROTOCOL_VERSION: u32 = 1;

impl HandshakeFrame {
    pub fn parse(line: &str) -> AgentResult<Self> {
        let parts: Vec<&str> = line.trim().split('|').collect();
        if parts.len() != 5 {
            return Err(AgentError::IncompatibleVersion(format!(
                "malformed handshake frame: {line}"
            )));
        }
        let protocol_version = parts[1]
            .parse()
            .map_err(|_| AgentError::IncompatibleVersion(format!("malformed protocol version: {}", parts[1])))?;
        Ok(Self {
            magic_cookie: parts[0].to_string(),
            protocol_version,
            api_version: parts[2].to_string(),
            network: parts[3].to_string(),
            address: parts[4].to_string(),
        })
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.magic_cookie != EXPECTED_MAGIC_COOKIE {
            return Err(AgentError::IncompatibleVersion(format!(
                "magic cookie mismatch: {}",
                self.magic_cookie
            )));
        }
        if self.protocol_version != HOST_PROTOCOL_VERSION {
            return Err(AgentError::IncompatibleVersion(format!(
                "protocol version mismatch: {}",
                self.protocol_version
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub binary_path: PathBuf,
    pub env: HashMap<String, String>,
    pub handshake_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Running,
    Exited(i32),
    Killed,
}

/// Abstracts over "an OS child process that speaks the plugin handshake on
/// stdout", so the supervisor can be exercised against an in-memory fake.
#[async_trait]
pub trait PluginProcess: Send + Sync {
    async fn handshake(&mut self, timeout: Duration) -> AgentResult<HandshakeFrame>;
    async fn poll_exit(&mut self) -> ExitStatus;
    async fn kill(&mut self) -> AgentResult<()>;
    fn pid(&self) -> Option<u32>;
}

/// Spawns real plugin subprocesses and reads their handshake line from stdout.
pub struct OsPluginProcess {
    child: tokio::process::Child,
    stdout: tokio::io::BufReader<tokio::process::ChildStdout>,
}

#[async_trait]
impl PluginProcess for OsPluginProcess {
    async fn handshake(&mut self, timeout: Duration) -> AgentResult<HandshakeFrame> {
        use tokio::io::AsyncBufReadExt;
        let mut line = String::new();
        tokio::time::timeout(timeout, self.stdout.read_line(&mut line))
            .await
            .map_err(|_| AgentError::Timeout("plugin handshake timed out".to_string()))?
            .map_err(|e| AgentError::internal(format!("failed to read plugin handshake: {e}")))?;
        let frame = HandshakeFrame::parse(&line)?;
        frame.validate()?;
        Ok(frame)
    }

    async fn poll_exit(&mut self) -> ExitStatus {
        match self.child.try_wait() {
            Ok(Some(status)) => ExitStatus::Exited(status.code().unwrap_or(-1)),
            Ok(None) => ExitStatus::Running,
            Err(_) => ExitStatus::Exited(-1),
        }
    }

    async fn kill(&mut self) -> AgentResult<()> {
        self.child
            .start_kill()
            .map_err(|e| AgentError::internal(format!("failed to kill plugin process: {e}")))?;
        let _ = self.child.wait().await;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

pub async fn spawn(spec: &SpawnSpec) -> AgentResult<OsPluginProcess> {
    use std::process::Stdio;

    if !spec.binary_path.is_file() {
        return Err(AgentError::internal(format!(
            "plugin binary is not a regular file: {}",
            spec.binary_path.display()
        )));
    }

    let mut command = tokio::process::Command::new(&spec.binary_path);
    command.envs(&spec.env).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| AgentError::internal(format!("failed to spawn plugin: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AgentError::internal("plugin process has no stdout"))?;

    Ok(OsPluginProcess {
        child,
        stdout: tokio::io::BufReader::new(stdout),
    })
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    pub struct FakePluginProcess {
        pub handshake_line: Option<String>,
        pub exit_status: std::sync::Arc<Mutex<ExitStatus>>,
        pub killed: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl FakePluginProcess {
        pub fn new(handshake_line: impl Into<String>) -> Self {
            Self {
                handshake_line: Some(handshake_line.into()),
                exit_status: std::sync::Arc::new(Mutex::new(ExitStatus::Running)),
                killed: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            }
        }

        pub async fn crash(&self) {
            *self.exit_status.lock().await = ExitStatus::Exited(1);
        }
    }

    #[async_trait]
    impl PluginProcess for FakePluginProcess {
        async fn handshake(&mut self, _timeout: Duration) -> AgentResult<HandshakeFrame> {
            let line = self
                .handshake_line
                .take()
                .ok_or_else(|| AgentError::internal("handshake already consumed"))?;
            let frame = HandshakeFrame::parse(&line)?;
            frame.validate()?;
            Ok(frame)
        }

        async fn poll_exit(&mut self) -> ExitStatus {
            *self.exit_status.lock().await
        }

        async fn kill(&mut self) -> AgentResult<()> {
            self.killed.store(true, std::sync::atomic::Ordering::SeqCst);
            *self.exit_status.lock().await = ExitStatus::Killed;
            Ok(())
        }

        fn pid(&self) -> Option<u32> {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_handshake_parses() {
        let frame = HandshakeFrame::parse("SNOOZEBOT_PLUGIN|1|1.2.0|tcp|127.0.0.1:50100\n").unwrap();
        assert_eq!(frame.magic_cookie, EXPECTED_MAGIC_COOKIE);
        assert_eq!(frame.protocol_version, 1);
        assert_eq!(frame.address, "127.0.0.1:50100");
        frame.validate().unwrap();
    }

    #[test]
    fn wrong_magic_cookie_fails_validation() {
        let frame = HandshakeFrame::parse("WRONG|1|1.2.0|tcp|127.0.0.1:50100").unwrap();
        assert!(frame.validate().is_err());
    }

    #[test]
    fn wrong_protocol_version_fails_validation() {
        let frame = HandshakeFrame::parse("SNOOZEBOT_PLUGIN|99|1.2.0|tcp|127.0.0.1:50100").unwrap();
        assert!(frame.validate().is_err());
    }

    #[test]
    fn malformed_frame_is_rejected() {
        assert!(HandshakeFrame::parse("not-enough-fields").is_err());
    }
}

//! Agent-wide error taxonomy and its mappings onto the two ingress
//! transports (HTTP status codes, gRPC `tonic::Status` codes).

use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

/// The error kinds surfaced in Ingress replies and Security Event Log entries.
#[derive(Debug, Error, Clone)]
pub enum AgentError {
    #[error("instance or plugin not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("plugin unavailable: {0}")]
    PluginUnavailable(String),

    #[error("incompatible version: {0}")]
    IncompatibleVersion(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("signature expired: {0}")]
    SignatureExpired(String),

    #[error("signing key revoked: {0}")]
    KeyRevoked(String),

    #[error("signing key untrusted: {0}")]
    KeyUntrusted(String),

    #[error("TLS failure: {0}")]
    TlsFailure(String),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("internal error [{id}]: {message}")]
    Internal { id: String, message: String },
}

impl AgentError {
    pub fn internal(message: impl Into<String>) -> Self {
        AgentError::Internal {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
        }
    }

    /// Stable lower_snake_case tag used on the wire and in security events.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::NotFound(_) => "not_found",
            AgentError::AlreadyExists(_) => "already_exists",
            AgentError::InvalidTransition(_) => "invalid_transition",
            AgentError::InvalidArgument(_) => "invalid_argument",
            AgentError::Timeout(_) => "timeout",
            AgentError::PluginUnavailable(_) => "plugin_unavailable",
            AgentError::IncompatibleVersion(_) => "incompatible_version",
            AgentError::SignatureInvalid(_) => "signature_invalid",
            AgentError::SignatureExpired(_) => "signature_expired",
            AgentError::KeyRevoked(_) => "key_revoked",
            AgentError::KeyUntrusted(_) => "key_untrusted",
            AgentError::TlsFailure(_) => "tls_failure",
            AgentError::AuthFailure(_) => "auth_failure",
            AgentError::PermissionDenied(_) => "permission_denied",
            AgentError::Internal { .. } => "internal",
        }
    }

    /// Security-relevant kinds are logged to the Security Event Log and
    /// are never retried. `NotFound`/`AlreadyExists` are plain client
    /// errors and are explicitly excluded.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            AgentError::SignatureInvalid(_)
                | AgentError::SignatureExpired(_)
                | AgentError::KeyRevoked(_)
                | AgentError::KeyUntrusted(_)
                | AgentError::TlsFailure(_)
                | AgentError::AuthFailure(_)
                | AgentError::PermissionDenied(_)
        )
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AgentError::InvalidArgument(_) => 400,
            AgentError::AuthFailure(_) => 401,
            AgentError::PermissionDenied(_) => 403,
            AgentError::NotFound(_) => 404,
            AgentError::Timeout(_) => 408,
            AgentError::AlreadyExists(_) | AgentError::InvalidTransition(_) => 409,
            AgentError::SignatureInvalid(_)
            | AgentError::SignatureExpired(_)
            | AgentError::KeyRevoked(_)
            | AgentError::KeyUntrusted(_)
            | AgentError::TlsFailure(_)
            | AgentError::IncompatibleVersion(_) => 422,
            AgentError::PluginUnavailable(_) => 503,
            AgentError::Internal { .. } => 500,
        }
    }
}

impl From<AgentError> for tonic::Status {
    fn from(err: AgentError) -> Self {
        let code = match &err {
            AgentError::NotFound(_) => tonic::Code::NotFound,
            AgentError::AlreadyExists(_) => tonic::Code::AlreadyExists,
            AgentError::InvalidTransition(_) | AgentError::InvalidArgument(_) => {
                tonic::Code::InvalidArgument
            }
            AgentError::Timeout(_) => tonic::Code::DeadlineExceeded,
            AgentError::PluginUnavailable(_) => tonic::Code::Unavailable,
            AgentError::IncompatibleVersion(_) => tonic::Code::FailedPrecondition,
            AgentError::SignatureInvalid(_)
            | AgentError::SignatureExpired(_)
            | AgentError::KeyRevoked(_)
            | AgentError::KeyUntrusted(_)
            | AgentError::TlsFailure(_) => tonic::Code::FailedPrecondition,
            AgentError::AuthFailure(_) => tonic::Code::Unauthenticated,
            AgentError::PermissionDenied(_) => tonic::Code::PermissionDenied,
            AgentError::Internal { .. } => tonic::Code::Internal,
        };
        tonic::Status::new(code, err.to_string())
    }
}

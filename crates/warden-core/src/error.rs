//! Error types for Warden.
//!
//! Each component reports a closed set of failure kinds. `Display` carries the
//! internal detail that goes to the logs; `public_message()` is the only text
//! that may be handed back across the transport boundary.

use thiserror::Error;

/// Boxed error produced by an external tool implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Consent error: {0}")]
    Consent(#[from] ConsentError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Generic, caller-safe description of the failure.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Consent(e) => e.public_message(),
            Self::Execution(e) => e.public_message(),
            Self::Tool(e) => e.public_message(),
            Self::Audit(_) | Self::Config(_) | Self::Json(_) => "Internal error",
        }
    }
}

/// Consent request and token lifecycle failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsentError {
    #[error("invalid consent input: {0}")]
    Validation(String),

    #[error("consent request {0} not found")]
    NotFound(String),

    #[error("consent request {request_id} belongs to another user (caller {caller})")]
    OwnershipMismatch { request_id: String, caller: String },

    #[error("consent request {request_id} already decided ({status})")]
    AlreadyDecided { request_id: String, status: String },

    #[error("consent request {0} expired")]
    Expired(String),

    /// Unknown, mismatched or already consumed token.
    #[error("consent token rejected: {0}")]
    InvalidToken(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

impl ConsentError {
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Invalid request",
            Self::NotFound(_) => "Consent request not found",
            Self::OwnershipMismatch { .. } => "Consent request could not be processed",
            Self::AlreadyDecided { .. } => "Consent request has already been decided",
            Self::Expired(_) => "Consent request expired; please create a new one",
            Self::InvalidToken(_) => "Invalid or expired consent token",
            Self::Signing(_) => "Internal error",
        }
    }

    /// True for the temporal failure kind.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired(_))
    }
}

/// Failures of a consent-gated sensitive action.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("invalid execution input: {0}")]
    Validation(String),

    #[error("no consent token supplied")]
    EmptyToken,

    /// The token was invalid, expired, replayed or bound to a denied request.
    #[error("consent token rejected for {action} on {target}")]
    ConsentRejected { action: String, target: String },

    #[error("resource {resource_id} is not owned by {user}")]
    Ownership { resource_id: String, user: String },

    #[error("resource {0} not found")]
    ResourceNotFound(String),

    #[error("action failed: {0}")]
    Failed(String),
}

impl ExecutionError {
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Invalid request",
            Self::EmptyToken => "A consent token is required for this action",
            Self::ConsentRejected { .. } => "Invalid or expired consent token",
            Self::Ownership { .. } | Self::ResourceNotFound(_) => {
                "The action could not be performed"
            }
            Self::Failed(_) => "The action failed",
        }
    }
}

/// Tool gateway failures.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool '{0}' is not registered")]
    NotFound(String),

    #[error("unauthorized call to tool '{0}'")]
    Unauthorized(String),

    #[error("tool '{tool}' failed: {source}")]
    ExecutionFailed {
        tool: String,
        #[source]
        source: BoxError,
    },
}

impl ToolError {
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "Requested tool is not available",
            Self::Unauthorized(_) => "Unauthorized",
            Self::ExecutionFailed { .. } => "Tool execution failed",
        }
    }
}

/// Audit sink failures. Never propagated past `audit::record`.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("audit serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_hides_detail() {
        let err = Error::from(ConsentError::OwnershipMismatch {
            request_id: "req-1".into(),
            caller: "mallory".into(),
        });
        assert!(err.to_string().contains("mallory"));
        assert!(!err.public_message().contains("mallory"));
    }

    #[test]
    fn test_replay_and_unknown_token_share_message() {
        let replay = ConsentError::InvalidToken("already consumed".into());
        let unknown = ConsentError::InvalidToken("unknown token".into());
        assert_eq!(replay.public_message(), unknown.public_message());
    }
}

//! Error taxonomy shared by every component and the command gateway

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error tag forwarded to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidRequest,
    DuplicateName,
    NotFound,
    InvalidVersion,
    InvalidUsername,
    InUse,
    AlreadyRunning,
    NotRunning,
    LaunchFailed,
    Timeout,
    PersistenceError,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::DuplicateName => "DuplicateName",
            Self::NotFound => "NotFound",
            Self::InvalidVersion => "InvalidVersion",
            Self::InvalidUsername => "InvalidUsername",
            Self::InUse => "InUse",
            Self::AlreadyRunning => "AlreadyRunning",
            Self::NotRunning => "NotRunning",
            Self::LaunchFailed => "LaunchFailed",
            Self::Timeout => "Timeout",
            Self::PersistenceError => "PersistenceError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Error)]
pub enum LauncherError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("An instance named '{0}' already exists")]
    DuplicateName(String),

    #[error("Instance '{0}' was not found")]
    NotFound(String),

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Instance '{0}' is in use by a running session")]
    InUse(String),

    #[error("Instance '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Instance '{0}' is not running")]
    NotRunning(String),

    #[error("Failed to launch '{name}': {cause}")]
    LaunchFailed { name: String, cause: String },

    #[error("Timed out after {secs}s waiting for '{name}' to {waiting_for}")]
    Timeout {
        name: String,
        waiting_for: &'static str,
        secs: u64,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl LauncherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::DuplicateName(_) => ErrorKind::DuplicateName,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidVersion { .. } => ErrorKind::InvalidVersion,
            Self::InvalidUsername(_) => ErrorKind::InvalidUsername,
            Self::InUse(_) => ErrorKind::InUse,
            Self::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            Self::NotRunning(_) => ErrorKind::NotRunning,
            Self::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Persistence(_) => ErrorKind::PersistenceError,
        }
    }

    pub fn launch_failed(name: &str, cause: impl std::fmt::Display) -> Self {
        Self::LaunchFailed {
            name: name.to_string(),
            cause: cause.to_string(),
        }
    }
}

impl From<anyhow::Error> for LauncherError {
    fn from(err: anyhow::Error) -> Self {
        // Alternate formatting keeps the whole context chain
        Self::Persistence(format!("{:#}", err))
    }
}

impl From<tokio::task::JoinError> for LauncherError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Persistence(format!("Storage task failed: {}", err))
    }
}

pub type LauncherResult<T> = std::result::Result<T, LauncherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_errors_keep_context_chain() {
        let err = anyhow::anyhow!("disk full").context("Failed to save instance");
        let err = LauncherError::from(err);
        assert_eq!(err.kind(), ErrorKind::PersistenceError);
        assert!(err.to_string().contains("Failed to save instance"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn kind_serializes_as_plain_tag() {
        let json = serde_json::to_string(&ErrorKind::AlreadyRunning).unwrap();
        assert_eq!(json, "\"AlreadyRunning\"");
    }
}

//! Error types for vidplay-core

use crate::types::SessionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy surfaced to hosts, both as command results and in `error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad command parameters, reported immediately with no state change
    InvalidArgument,
    /// Command is not valid in the session's current state
    InvalidState,
    /// Certificate or license resolution failed
    DrmFailure,
    /// Engine could not open the resolved source
    OpenFailure,
    /// Content cache could not provide a source
    CacheUnavailable,
    /// Engine reported an unexpected error during playback
    EngineFault,
    /// Session has been disposed
    Disposed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::DrmFailure => "DrmFailure",
            ErrorKind::OpenFailure => "OpenFailure",
            ErrorKind::CacheUnavailable => "CacheUnavailable",
            ErrorKind::EngineFault => "EngineFault",
            ErrorKind::Disposed => "Disposed",
        };
        f.write_str(name)
    }
}

/// Session error types
#[derive(Error, Debug)]
pub enum Error {
    // Command validation
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Command `{command}` not valid in state {state}")]
    InvalidState {
        command: &'static str,
        state: SessionState,
    },

    // Source resolution
    #[error("DRM failure: {reason}")]
    DrmFailure { reason: String },

    #[error("Failed to open source after {attempts} attempt(s): {message}")]
    OpenFailure { attempts: u32, message: String },

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    // Playback
    #[error("Engine fault: {0}")]
    EngineFault(String),

    #[error("Picture-in-picture is not available")]
    PipUnavailable,

    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("Session disposed")]
    Disposed,

    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a DRM error
    pub fn drm(reason: impl Into<String>) -> Self {
        Error::DrmFailure {
            reason: reason.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Map this error onto the host-visible taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) | Error::Config(_) | Error::Json(_) => {
                ErrorKind::InvalidArgument
            }
            Error::InvalidState { .. } | Error::PipUnavailable | Error::Aborted(_) => {
                ErrorKind::InvalidState
            }
            Error::DrmFailure { .. } => ErrorKind::DrmFailure,
            Error::OpenFailure { .. } | Error::Io(_) => ErrorKind::OpenFailure,
            Error::Network(_) => ErrorKind::OpenFailure,
            Error::CacheUnavailable(_) => ErrorKind::CacheUnavailable,
            Error::EngineFault(_) => ErrorKind::EngineFault,
            Error::Disposed => ErrorKind::Disposed,
        }
    }

    /// Returns true if retrying the same descriptor may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::OpenFailure { .. } | Error::Network(_) | Error::Io(_)
        )
    }

    /// Returns the error code for telemetry
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::DrmFailure { .. } => "DRM_FAILURE",
            Error::OpenFailure { .. } => "OPEN_FAILURE",
            Error::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Error::EngineFault(_) => "ENGINE_FAULT",
            Error::PipUnavailable => "PIP_UNAVAILABLE",
            Error::Aborted(_) => "ABORTED",
            Error::Disposed => "DISPOSED",
            Error::Network(_) => "NETWORK",
            Error::Config(_) => "INVALID_CONFIG",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::drm("no key").kind(), ErrorKind::DrmFailure);
        assert_eq!(Error::invalid("rate").kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            Error::InvalidState {
                command: "play",
                state: SessionState::Opening,
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(Error::Disposed.kind(), ErrorKind::Disposed);
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::OpenFailure {
            attempts: 1,
            message: "io".into()
        }
        .is_recoverable());
        assert!(!Error::drm("denied").is_recoverable());
        assert!(!Error::EngineFault("decoder".into()).is_recoverable());
    }

    #[test]
    fn test_kind_serializes_by_name() {
        let json = serde_json::to_string(&ErrorKind::DrmFailure).unwrap();
        assert_eq!(json, "\"DrmFailure\"");
    }
}

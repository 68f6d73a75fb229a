//! Error taxonomy shared by every bucketeer crate.
//!
//! Nothing here is fatal to the process. Every variant except
//! [`Error::InvalidConfig`] means "do not advance state, let the next pass retry".

use std::fmt;

use thiserror::Error;

use crate::types::Kind;

/// Phase of a convergence pass an error surfaced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    /// Resolving the server dependency and credentials.
    Resolve,
    /// Persisting owner link and finalizer token.
    Claim,
    /// Reading the remote snapshot.
    Observe,
    /// Executing corrective remote calls.
    Apply,
    /// Running remote cleanup and releasing the finalizer.
    Finalize,
    /// Writing observed status.
    Persist,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolve => "resolve",
            Self::Claim => "claim",
            Self::Observe => "observe",
            Self::Apply => "apply",
            Self::Finalize => "finalize",
            Self::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Coarse classification used for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    DependencyUnresolved,
    Remote,
    DataIntegrity,
    Conflict,
    Cancelled,
    Configuration,
}

/// Core error type for bucketeer operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: Kind, name: String },

    #[error("{kind} '{name}' has not been observed yet")]
    DependencyUnresolved { kind: Kind, name: String },

    #[error("remote call '{operation}' failed: {reason}")]
    RemoteCall { operation: String, reason: String },

    #[error("secret backend {operation} of '{path}' failed: {reason}")]
    SecretBackend {
        operation: String,
        path: String,
        reason: String,
    },

    #[error("data integrity violation: {reason}")]
    DataIntegrity { reason: String },

    #[error("conflict writing '{key}': {reason}")]
    Conflict { key: String, reason: String },

    #[error("object '{key}' is invalid: {reason}")]
    InvalidObject { key: String, reason: String },

    #[error("pass for '{key}' was cancelled")]
    Cancelled { key: String },

    #[error("pass for '{key}' exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded { key: String, timeout_ms: u64 },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("reconciling '{key}' failed during {phase}: {source}")]
    Pass {
        key: String,
        phase: PassPhase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(kind: Kind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an unresolved dependency error.
    pub fn dependency_unresolved(kind: Kind, name: impl Into<String>) -> Self {
        Self::DependencyUnresolved {
            kind,
            name: name.into(),
        }
    }

    /// Create a remote call error tagged with the operation name.
    pub fn remote_call(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RemoteCall {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a secret backend error.
    pub fn secret_backend(
        operation: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SecretBackend {
            operation: operation.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a data integrity error.
    pub fn data_integrity(reason: impl Into<String>) -> Self {
        Self::DataIntegrity {
            reason: reason.into(),
        }
    }

    /// Create a persistence conflict error.
    pub fn conflict(key: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::Conflict {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid object error.
    pub fn invalid_object(key: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidObject {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Wrap an error with the identity and phase of the pass it aborted.
    #[must_use]
    pub fn in_pass(self, key: impl fmt::Display, phase: PassPhase) -> Self {
        Self::Pass {
            key: key.to_string(),
            phase,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through pass wrappers.
    pub fn root(&self) -> &Self {
        match self {
            Self::Pass { source, .. } => source.root(),
            other => other,
        }
    }

    /// Phase of the outermost pass wrapper, if any.
    pub const fn phase(&self) -> Option<PassPhase> {
        match self {
            Self::Pass { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Pass { source, .. } => source.category(),
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::DependencyUnresolved { .. } => ErrorCategory::DependencyUnresolved,
            Self::RemoteCall { .. } | Self::SecretBackend { .. } => ErrorCategory::Remote,
            Self::DataIntegrity { .. } | Self::InvalidObject { .. } => {
                ErrorCategory::DataIntegrity
            }
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Cancelled { .. } | Self::DeadlineExceeded { .. } => ErrorCategory::Cancelled,
            Self::InvalidConfig { .. } => ErrorCategory::Configuration,
        }
    }

    /// Whether the next pass may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        self.category() != ErrorCategory::Configuration
    }
}

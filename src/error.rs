//! Error types for fabricctl

use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::EntityKind;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for release orchestration
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Settings document could not be read or parsed
    #[error("config error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Active kube context points at a different cluster than the settings expect
    #[error("cluster mismatch: expected '{expected}', active context uses '{actual}'")]
    ClusterMismatch { expected: String, actual: String },

    /// Entity name missing from its settings mapping
    #[error("{kind} '{name}' not found in settings")]
    Lookup { kind: EntityKind, name: String },

    /// Operation requested against a release in the wrong state
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// External command exited non-zero
    #[error("command `{command}` failed: {message}")]
    Execution { command: String, message: String },

    /// Polled condition never held within the attempt budget
    #[error("{target} not ready after {attempts} attempts")]
    ReadinessTimeout { target: String, attempts: u32 },

    /// Caller cancelled the run
    #[error("operation cancelled")]
    Cancelled,

    /// Secret missing from its namespace
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { name: String, namespace: String },

    /// Invalid input that is not tied to a settings file
    #[error("validation error: {0}")]
    Validation(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a config error for the given settings path
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a precondition error with the given message
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    /// Create an execution error for a command line
    pub fn execution(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether a later run of the same command may succeed without operator changes.
    ///
    /// Settings and precondition failures need the operator to fix input first;
    /// execution and readiness failures leave releases in a resumable state.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            Error::Execution { .. }
                | Error::ReadinessTimeout { .. }
                | Error::Cancelled
                | Error::Kube(_)
        )
    }
}

/// Extension trait to convert errors with Display to [`Error::Validation`].
///
/// Used where a foreign error only needs to surface its message.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::Validation` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::validation(e.to_string()))
    }
}

//! Error types for function invocation.

use std::path::PathBuf;

/// Errors produced while preparing, running or recording a function.
#[derive(Debug, thiserror::Error)]
pub enum FnError {
    #[error("image pull policy must be one of Always, IfNotPresent and Never, got {0:?}")]
    InvalidPullPolicy(String),

    #[error("invalid storage mount {spec:?}: {reason}")]
    InvalidMount { spec: String, reason: String },

    #[error("image {image} not found locally and the pull policy is Never")]
    ImageNotFound { image: String },

    #[error("failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("executable {path:?} may only run with allow-exec")]
    ExecNotAllowed { path: PathBuf },

    #[error("cannot read or create results dir {path:?}")]
    ResultsDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start function {function}")]
    Spawn {
        function: String,
        #[source]
        source: std::io::Error,
    },

    /// The function exited non-zero. `stderr` holds everything it wrote.
    #[error("function {function} failed with exit code {exit_code}:\n{stderr}")]
    FunctionExecutionFailed {
        function: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("function {function} cancelled: {reason}")]
    Cancelled { function: String, reason: String },

    #[error("failed to write function results: {0}")]
    Results(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for function invocation.
pub type FnResult<T> = std::result::Result<T, FnError>;

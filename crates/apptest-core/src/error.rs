//! Render error types.

use std::path::PathBuf;

use apptest_fnruntime::FnError;
use apptest_kio::KioError;

/// Errors that end a render. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("input {path:?} not found")]
    InputNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve symlink {path:?}")]
    SymlinkUnresolved {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read input {path:?}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: KioError,
    },

    #[error("function {function} failed")]
    Function {
        function: String,
        #[source]
        source: FnError,
    },

    #[error(transparent)]
    Deliver(#[from] KioError),

    /// The render was cancelled before a function process started.
    #[error("render cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("cannot create results dir {path:?}")]
    ResultsDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    /// The function's stderr, when the error is a failed function run.
    pub fn function_stderr(&self) -> Option<&str> {
        match self {
            RenderError::Function {
                source: FnError::FunctionExecutionFailed { stderr, .. },
                ..
            } => Some(stderr),
            _ => None,
        }
    }
}

/// Result type for rendering.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

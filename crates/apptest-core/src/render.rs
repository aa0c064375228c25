//! The render pipeline: resolve the input, run the function, deliver the
//! result.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use apptest_fnruntime::results::ensure_results_dir;
use apptest_fnruntime::{
    ContainerRuntime, FnError, FunctionPermission, FunctionRunner, FunctionTarget, ImagePullPolicy,
    InvocationRequest, StorageMount,
};
use apptest_kio::{check_directory_not_present, decode, deliver, encode_resource_list, Destination};

use crate::error::{RenderError, RenderResult};
use crate::pathutil::resolve_symlink;
use crate::printer::Printer;

/// Input path meaning standard input.
pub const STDIN_PATH: &str = "-";

/// Everything a render needs, gathered from the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Input file, or `-` for stdin.
    pub input: PathBuf,
    /// Container image, or `exec:<path>` for a host executable.
    pub function: String,
    /// `stdout`, `unwrap`, a directory path, or unset.
    pub output: Option<String>,
    pub results_dir: Option<PathBuf>,
    pub image_pull_policy: ImagePullPolicy,
    pub allow_exec: bool,
    pub network: bool,
    pub mounts: Vec<StorageMount>,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub timeout: Option<Duration>,
}

impl RenderConfig {
    pub fn new(input: impl Into<PathBuf>, function: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            function: function.into(),
            ..Self::default()
        }
    }

    pub fn reads_stdin(&self) -> bool {
        self.input.as_os_str() == STDIN_PATH
    }

    pub fn destination(&self) -> Destination {
        match self.output.as_deref() {
            Some(output) => output
                .parse()
                .unwrap_or_else(|never: std::convert::Infallible| match never {}),
            None => Destination::Unset,
        }
    }

    /// Grants derived from the flags; nothing beyond what was asked for.
    pub fn permission(&self) -> FunctionPermission {
        let mut permission = FunctionPermission::deny_all().with_mounts(self.mounts.clone());
        if self.network {
            permission = permission.with_network();
        }
        if self.allow_exec {
            permission = permission.with_exec();
        }
        if let Some(user) = &self.user {
            permission = permission.with_user(user.clone());
        }
        permission
    }

    pub fn request(&self) -> InvocationRequest {
        let target = self
            .function
            .parse::<FunctionTarget>()
            .unwrap_or_else(|never| match never {});
        let mut request = InvocationRequest::new(target)
            .with_pull_policy(self.image_pull_policy)
            .with_permission(self.permission())
            .with_env(self.env.iter().cloned());
        if let Some(dir) = &self.results_dir {
            request = request.with_results_dir(dir);
        }
        if let Some(timeout) = self.timeout {
            request = request.with_timeout(timeout);
        }
        request
    }
}

/// Where a render has got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderState {
    Init,
    Resolved,
    Invoked,
    Delivered,
}

/// What a completed render did.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutcome {
    /// Resolved input path, `None` for stdin.
    pub input: Option<PathBuf>,
    /// Resources sent to the function.
    pub resources: usize,
    pub destination: Destination,
    pub results_file: Option<PathBuf>,
}

/// Runs one render with a fixed configuration, runtime and printer.
pub struct Renderer {
    config: RenderConfig,
    runner: FunctionRunner,
    printer: Printer,
    stdin: Option<Vec<u8>>,
    state: RenderState,
}

impl Renderer {
    pub fn new(config: RenderConfig, runtime: Arc<dyn ContainerRuntime>, printer: Printer) -> Self {
        Self {
            config,
            runner: FunctionRunner::new(runtime),
            printer,
            stdin: None,
            state: RenderState::Init,
        }
    }

    /// Serve `-` from `input` instead of the process stdin.
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    fn transition(&mut self, next: RenderState) {
        info!(from = ?self.state, to = ?next, "render state");
        self.state = next;
    }

    /// Run the render to completion.
    ///
    /// Failures are terminal: a failed function delivers nothing, and the
    /// error is returned with the function identifier attached.
    pub async fn execute(&mut self, cancel: &CancellationToken) -> RenderResult<RenderOutcome> {
        self.state = RenderState::Init;
        let destination = self.config.destination();

        let input_path = self.resolve_input()?;
        self.preflight(&destination)?;
        self.transition(RenderState::Resolved);

        let (input, label) = self.read_input(input_path.as_deref(), cancel).await?;
        let stream = decode(&input).map_err(|source| RenderError::Decode {
            path: label.clone(),
            source,
        })?;
        let resources = stream.len();
        let envelope = encode_resource_list(&stream).map_err(|source| RenderError::Decode {
            path: label.clone(),
            source,
        })?;

        let function = self.config.function.clone();
        let output = self
            .runner
            .invoke(&self.config.request(), envelope.as_bytes(), cancel)
            .await
            .map_err(|source| RenderError::Function {
                function: function.clone(),
                source,
            })?;
        self.transition(RenderState::Invoked);

        let from_stdin = self.config.reads_stdin();
        self.printer
            .with_out(|out| deliver(&output.stdout, &destination, from_stdin, out))
            .map_err(|e| RenderError::Deliver(e.into()))??;
        self.transition(RenderState::Delivered);

        Ok(RenderOutcome {
            input: input_path,
            resources,
            destination,
            results_file: output.results_file,
        })
    }

    fn resolve_input(&self) -> RenderResult<Option<PathBuf>> {
        if self.config.reads_stdin() {
            return Ok(None);
        }
        let given = &self.config.input;
        let resolved = resolve_symlink(given)?;
        if resolved.was_symlink {
            let warning = format!(
                "resolved symlink {:?} to {:?}, please note that the symlinks within the package are ignored",
                given, resolved.path
            );
            if let Err(e) = self.printer.warn(warning) {
                debug!(error = %e, "failed to print symlink warning");
            }
        }
        Ok(Some(resolved.path))
    }

    fn preflight(&self, destination: &Destination) -> RenderResult<()> {
        if let Some(dir) = destination.directory() {
            check_directory_not_present(dir)?;
        }
        if let Some(dir) = &self.config.results_dir {
            ensure_results_dir(dir).map_err(|e| match e {
                FnError::ResultsDirUnavailable { path, source } => {
                    RenderError::ResultsDirUnavailable { path, source }
                }
                other => RenderError::ResultsDirUnavailable {
                    path: dir.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
                },
            })?;
        }
        Ok(())
    }

    async fn read_input(
        &self,
        path: Option<&Path>,
        cancel: &CancellationToken,
    ) -> RenderResult<(Vec<u8>, PathBuf)> {
        match path {
            Some(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|source| RenderError::ReadInput {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok((bytes, path.to_path_buf()))
            }
            None => {
                let label = PathBuf::from(STDIN_PATH);
                if let Some(bytes) = &self.stdin {
                    return Ok((bytes.clone(), label));
                }
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(RenderError::Cancelled {
                            reason: "cancelled while reading stdin".to_string(),
                        });
                    }
                    read = read_stdin() => read,
                };
                let bytes = read.map_err(|source| RenderError::ReadInput {
                    path: label.clone(),
                    source,
                })?;
                Ok((bytes, label))
            }
        }
    }
}

/// Read all of stdin on a detached thread.
///
/// A blocked read cannot be interrupted, and a runtime blocking task would
/// hold up shutdown after cancellation; the thread dies with the process.
async fn read_stdin() -> std::io::Result<Vec<u8>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let mut bytes = Vec::new();
        let read = std::io::stdin().read_to_end(&mut bytes).map(|_| bytes);
        let _ = tx.send(read);
    });
    rx.await.map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin reader stopped")
    })?
}

//! Running one function process over a resource stream.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_yaml::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{FnError, FnResult};
use crate::policy::ImagePullPolicy;
use crate::request::{FunctionTarget, InvocationRequest};
use crate::results::{ensure_results_dir, sha256_hex, write_results, FunctionResult, FunctionResultList};
use crate::runtime::{exec_command, ContainerRuntime};

/// What a successful function run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionOutput {
    /// Everything the function wrote to stdout.
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: i32,
    /// Structured results reported in the returned resource list.
    pub results: Vec<Value>,
    /// Path of the results artifact, when a results dir was configured.
    pub results_file: Option<PathBuf>,
}

enum Outcome {
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    Cancelled(String),
}

/// Runs functions through a [`ContainerRuntime`].
#[derive(Clone)]
pub struct FunctionRunner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl FunctionRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Run the requested function once with `input` on its stdin.
    ///
    /// Every failure is terminal. A non-zero exit is reported as
    /// [`FnError::FunctionExecutionFailed`] after the results artifact is
    /// written. Cancellation or timeout, including while the image is
    /// being pulled, kills the process and writes no artifact. The timeout
    /// covers the pull and the run together.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
        input: &[u8],
        cancel: &CancellationToken,
    ) -> FnResult<FunctionOutput> {
        let function = request.target().to_string();
        let deadline = request
            .timeout()
            .map(|limit| (Instant::now() + limit, limit));

        let mut container = None;
        let mut command = match request.target() {
            FunctionTarget::Image(image) => {
                tokio::select! {
                    biased;
                    reason = interrupted(cancel, deadline) => {
                        return Err(FnError::Cancelled { function, reason });
                    }
                    ready = self.ensure_image(image, request.pull_policy()) => ready?,
                }
                let name = format!("apptest-fn-{}", Uuid::new_v4());
                let command =
                    self.runtime
                        .run_command(image, request.permission(), request.env(), &name);
                container = Some(name);
                command
            }
            FunctionTarget::Exec(path) => {
                if !request.permission().exec_allowed() {
                    return Err(FnError::ExecNotAllowed { path: path.clone() });
                }
                exec_command(path, request.env())
            }
        };

        if let Some(dir) = request.results_dir() {
            ensure_results_dir(dir)?;
        }
        if cancel.is_cancelled() {
            return Err(FnError::Cancelled {
                function,
                reason: "cancelled before start".to_string(),
            });
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started_at = Utc::now();
        let mut child = command.spawn().map_err(|source| FnError::Spawn {
            function: function.clone(),
            source,
        })?;
        info!(function = %function, pid = ?child.id(), "function started");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let outcome = {
            let exchange = async {
                let write_input = async move {
                    if let Some(mut stdin) = stdin {
                        match stdin.write_all(input).await {
                            Ok(()) => {}
                            // The function may exit without reading all of its input.
                            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Ok::<_, io::Error>(())
                };
                let ((), stdout, stderr) =
                    tokio::try_join!(write_input, drain(stdout), drain(stderr))?;
                let status = child.wait().await?;
                Ok::<_, io::Error>((status, stdout, stderr))
            };

            tokio::select! {
                biased;
                reason = interrupted(cancel, deadline) => Outcome::Cancelled(reason),
                exchanged = exchange => {
                    let (status, stdout, stderr) = exchanged?;
                    Outcome::Exited { status, stdout, stderr }
                }
            }
        };

        let (status, stdout, stderr) = match outcome {
            Outcome::Exited {
                status,
                stdout,
                stderr,
            } => (status, stdout, stderr),
            Outcome::Cancelled(reason) => {
                warn!(function = %function, reason = %reason, "killing function");
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "kill failed, process already gone");
                }
                if let Err(e) = child.wait().await {
                    debug!(error = %e, "failed to reap cancelled function");
                }
                // The engine client is gone; the container may still be running.
                if let Some(name) = &container {
                    if let Err(e) = self.runtime.kill_container(name).await {
                        warn!(container = %name, error = %e, "failed to kill function container");
                    }
                }
                return Err(FnError::Cancelled { function, reason });
            }
        };

        let finished_at = Utc::now();
        let exit_code = status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        info!(function = %function, exit_code, "function exited");

        let results = match apptest_kio::decode(&stdout) {
            Ok(stream) => stream.results,
            Err(e) => {
                debug!(error = %e, "function output is not a resource stream");
                Vec::new()
            }
        };

        let mut results_file = None;
        if let Some(dir) = request.results_dir() {
            let record = FunctionResultList::single(FunctionResult {
                function: function.clone(),
                exit_code,
                stderr: stderr.clone(),
                results: results.clone(),
                started_at,
                finished_at,
                input_digest: sha256_hex(input),
                output_digest: sha256_hex(&stdout),
            });
            match write_results(dir, &record) {
                Ok(path) => results_file = Some(path),
                Err(e) if exit_code == 0 => return Err(e),
                Err(e) => warn!(error = %e, "failed to write results of failed function"),
            }
        }

        if exit_code != 0 {
            return Err(FnError::FunctionExecutionFailed {
                function,
                exit_code,
                stderr,
            });
        }

        Ok(FunctionOutput {
            stdout,
            stderr,
            exit_code,
            results,
            results_file,
        })
    }

    async fn ensure_image(&self, image: &str, policy: ImagePullPolicy) -> FnResult<()> {
        match policy {
            ImagePullPolicy::Always => self.pull(image).await,
            ImagePullPolicy::IfNotPresent => {
                if self.runtime.image_exists(image).await? {
                    debug!(image, "image present locally");
                    Ok(())
                } else {
                    self.pull(image).await
                }
            }
            ImagePullPolicy::Never => {
                if self.runtime.image_exists(image).await? {
                    Ok(())
                } else {
                    Err(FnError::ImageNotFound {
                        image: image.to_string(),
                    })
                }
            }
        }
    }

    async fn pull(&self, image: &str) -> FnResult<()> {
        warn!(image, runtime = self.runtime.name(), "pulling function image");
        self.runtime.pull_image(image).await
    }
}

/// Resolves with a reason once `cancel` fires or `deadline` passes.
async fn interrupted(cancel: &CancellationToken, deadline: Option<(Instant, Duration)>) -> String {
    match deadline {
        Some((at, limit)) => tokio::select! {
            biased;
            _ = cancel.cancelled() => "cancelled".to_string(),
            _ = tokio::time::sleep_until(at) => format!("timed out after {limit:?}"),
        },
        None => {
            cancel.cancelled().await;
            "cancelled".to_string()
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

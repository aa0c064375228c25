//! The contract with the container engine, and the docker-compatible CLI
//! engines that implement it.

use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{FnError, FnResult};
use crate::permission::FunctionPermission;

/// Environment variable selecting the container engine.
pub const FN_RUNTIME_ENV: &str = "APPTEST_FN_RUNTIME";

/// User the container runs as unless the permission names another.
pub const DEFAULT_CONTAINER_USER: &str = "nobody";

/// What the invocation layer needs from a container engine.
///
/// The engine owns image storage and sandboxing; the invocation layer only
/// asks whether an image is present, asks for it to be pulled, and gets a
/// ready-to-spawn command for one run.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &str;

    async fn image_exists(&self, image: &str) -> FnResult<bool>;

    async fn pull_image(&self, image: &str) -> FnResult<()>;

    /// Command that runs `image` once as container `name`, reading the
    /// resource stream on stdin and writing the result to stdout. Stdio is
    /// configured by the caller.
    fn run_command(
        &self,
        image: &str,
        permission: &FunctionPermission,
        env: &[String],
        name: &str,
    ) -> Command;

    /// Stop container `name` after its run command was killed.
    async fn kill_container(&self, name: &str) -> FnResult<()>;
}

/// Supported docker-compatible engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    #[default]
    Docker,
    Podman,
    Nerdctl,
}

impl RuntimeKind {
    pub fn binary(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
            RuntimeKind::Nerdctl => "nerdctl",
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "podman" => Ok(RuntimeKind::Podman),
            "nerdctl" => Ok(RuntimeKind::Nerdctl),
            other => Err(format!(
                "unsupported function runtime {other:?}, expected docker, podman or nerdctl"
            )),
        }
    }
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

/// A container engine driven through its command line.
#[derive(Debug, Clone, Default)]
pub struct CliRuntime {
    kind: RuntimeKind,
}

impl CliRuntime {
    pub fn new(kind: RuntimeKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &str {
        self.kind.binary()
    }

    async fn image_exists(&self, image: &str) -> FnResult<bool> {
        let status = Command::new(self.kind.binary())
            .args(["image", "inspect", image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| FnError::Spawn {
                function: format!("{} image inspect", self.kind),
                source,
            })?;
        Ok(status.success())
    }

    async fn pull_image(&self, image: &str) -> FnResult<()> {
        let output = Command::new(self.kind.binary())
            .args(["pull", image])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| FnError::Spawn {
                function: format!("{} pull", self.kind),
                source,
            })?;
        if !output.status.success() {
            return Err(FnError::ImagePullFailed {
                image: image.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn run_command(
        &self,
        image: &str,
        permission: &FunctionPermission,
        env: &[String],
        name: &str,
    ) -> Command {
        let args = run_args(image, permission, env, name);
        debug!(runtime = %self.kind, args = ?args, "container command");
        let mut command = Command::new(self.kind.binary());
        command.args(args);
        command
    }

    async fn kill_container(&self, name: &str) -> FnResult<()> {
        let output = Command::new(self.kind.binary())
            .args(["kill", name])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| FnError::Spawn {
                function: format!("{} kill", self.kind),
                source,
            })?;
        if !output.status.success() {
            // --rm removes a container that already exited.
            debug!(
                container = name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "container not killed"
            );
        }
        Ok(())
    }
}

/// Arguments for `<engine> run`, derived from the permission set.
///
/// The engine's own network is only attached when the permission grants it;
/// privilege escalation inside the container is always disabled.
pub fn run_args(
    image: &str,
    permission: &FunctionPermission,
    env: &[String],
    name: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "-i".into(),
        "--name".into(),
        name.into(),
        "--network".into(),
        if permission.network_allowed() {
            "host".into()
        } else {
            "none".into()
        },
        "--user".into(),
        permission.user().unwrap_or(DEFAULT_CONTAINER_USER).into(),
        "--security-opt=no-new-privileges".into(),
    ];
    for mount in permission.mounts() {
        args.push("--mount".into());
        args.push(mount.to_mount_arg());
    }
    for var in env {
        args.push("-e".into());
        args.push(var.clone());
    }
    args.push(image.into());
    args
}

/// Command for a host executable function.
///
/// The host environment is not inherited: only `env` entries are passed,
/// bare `KEY` entries forwarding the host value when it is set.
pub fn exec_command(path: &Path, env: &[String]) -> Command {
    let mut command = Command::new(path);
    command.env_clear();
    for var in env {
        match var.split_once('=') {
            Some((key, value)) => {
                command.env(key, value);
            }
            None => {
                if let Ok(value) = std::env::var(var) {
                    command.env(var, value);
                }
            }
        }
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::StorageMount;

    #[test]
    fn test_runtime_kind_parse() {
        assert_eq!("docker".parse::<RuntimeKind>().unwrap(), RuntimeKind::Docker);
        assert_eq!("Podman".parse::<RuntimeKind>().unwrap(), RuntimeKind::Podman);
        assert_eq!("nerdctl".parse::<RuntimeKind>().unwrap(), RuntimeKind::Nerdctl);
        assert!("containerd".parse::<RuntimeKind>().is_err());
    }

    #[test]
    fn test_run_args_default_deny() {
        let args = run_args("fn:v1", &FunctionPermission::deny_all(), &[], "apptest-fn-1");
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "-i",
                "--name",
                "apptest-fn-1",
                "--network",
                "none",
                "--user",
                "nobody",
                "--security-opt=no-new-privileges",
                "fn:v1"
            ]
        );
    }

    #[test]
    fn test_run_args_with_grants() {
        let mount: StorageMount = "type=bind,src=/data,dst=/data".parse().unwrap();
        let perm = FunctionPermission::deny_all()
            .with_network()
            .with_mount(mount)
            .with_user("1000:1000");
        let args = run_args("fn:v1", &perm, &["LOG_LEVEL=debug".to_string()], "apptest-fn-2");

        let joined = args.join(" ");
        assert!(joined.contains("--network host"));
        assert!(joined.contains("--user 1000:1000"));
        assert!(joined.contains("--mount type=bind,source=/data,target=/data,readonly"));
        assert!(joined.contains("-e LOG_LEVEL=debug"));
        assert!(joined.contains("--name apptest-fn-2"));
        assert_eq!(args.last().map(String::as_str), Some("fn:v1"));
    }
}

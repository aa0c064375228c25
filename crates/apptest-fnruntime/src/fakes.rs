//! Script-backed container runtime (testing only)
//!
//! `ScriptRuntime` satisfies [`ContainerRuntime`] by running a `sh -c` script
//! in place of the container, so pipes, exit codes and kills are exercised for
//! real without a container engine on the host.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{FnError, FnResult};
use crate::permission::FunctionPermission;
use crate::runtime::ContainerRuntime;

// ---------------------------------------------------------------------------
// ScriptRuntime
// ---------------------------------------------------------------------------

/// Runs `script` with `sh -c` for every image.
///
/// The image is treated as present or absent according to `present`; a pull
/// marks it present unless the runtime was told pulls fail.
#[derive(Debug)]
pub struct ScriptRuntime {
    script: String,
    present: AtomicBool,
    pull_fails: bool,
    pull_delay: Option<Duration>,
    pulls: AtomicUsize,
    launches: AtomicUsize,
    kills: AtomicUsize,
    last_env: Mutex<Vec<String>>,
    last_container: Mutex<Option<String>>,
}

impl ScriptRuntime {
    /// A runtime whose image is already present locally.
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            present: AtomicBool::new(true),
            pull_fails: false,
            pull_delay: None,
            pulls: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            kills: AtomicUsize::new(0),
            last_env: Mutex::new(Vec::new()),
            last_container: Mutex::new(None),
        }
    }

    /// A runtime whose image has never been pulled.
    pub fn absent(script: impl Into<String>) -> Self {
        let runtime = Self::new(script);
        runtime.present.store(false, Ordering::SeqCst);
        runtime
    }

    pub fn with_failing_pull(mut self) -> Self {
        self.pull_fails = true;
        self
    }

    /// Make every pull take `delay` before it completes.
    pub fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = Some(delay);
        self
    }

    /// Number of pulls requested.
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Number of function processes prepared.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of container kills requested.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    /// Container name given to the most recent launch.
    pub fn last_container(&self) -> Option<String> {
        self.last_container
            .lock()
            .map(|name| name.clone())
            .unwrap_or_default()
    }

    /// Environment passed to the most recent launch.
    pub fn last_env(&self) -> Vec<String> {
        self.last_env
            .lock()
            .map(|env| env.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptRuntime {
    fn name(&self) -> &str {
        "script"
    }

    async fn image_exists(&self, _image: &str) -> FnResult<bool> {
        Ok(self.present.load(Ordering::SeqCst))
    }

    async fn pull_image(&self, image: &str) -> FnResult<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.pull_delay {
            tokio::time::sleep(delay).await;
        }
        if self.pull_fails {
            return Err(FnError::ImagePullFailed {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            });
        }
        self.present.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn run_command(
        &self,
        _image: &str,
        _permission: &FunctionPermission,
        env: &[String],
        name: &str,
    ) -> Command {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_env.lock() {
            *last = env.to_vec();
        }
        if let Ok(mut last) = self.last_container.lock() {
            *last = Some(name.to_string());
        }
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.script);
        for var in env {
            if let Some((key, value)) = var.split_once('=') {
                command.env(key, value);
            }
        }
        command
    }

    async fn kill_container(&self, _name: &str) -> FnResult<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

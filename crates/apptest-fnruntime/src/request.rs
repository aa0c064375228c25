//! Function invocation requests.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::permission::FunctionPermission;
use crate::policy::ImagePullPolicy;

/// Prefix marking a host executable instead of a container image.
pub const EXEC_PREFIX: &str = "exec:";

/// The function to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionTarget {
    /// A container image reference, e.g. `ghcr.io/acme/set-labels:v1`.
    Image(String),
    /// A host executable, only runnable when exec is permitted.
    Exec(PathBuf),
}

impl FromStr for FunctionTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.strip_prefix(EXEC_PREFIX) {
            Some(path) => FunctionTarget::Exec(PathBuf::from(path)),
            None => FunctionTarget::Image(s.to_string()),
        })
    }
}

impl std::fmt::Display for FunctionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionTarget::Image(image) => write!(f, "{image}"),
            FunctionTarget::Exec(path) => write!(f, "{EXEC_PREFIX}{}", path.display()),
        }
    }
}

/// Everything needed to run one function once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    target: FunctionTarget,
    pull_policy: ImagePullPolicy,
    permission: FunctionPermission,
    /// `KEY=VALUE` pairs, or bare `KEY` to forward the host value.
    env: Vec<String>,
    results_dir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl InvocationRequest {
    /// A request with the default pull policy and no permissions.
    pub fn new(target: FunctionTarget) -> Self {
        Self {
            target,
            pull_policy: ImagePullPolicy::default(),
            permission: FunctionPermission::deny_all(),
            env: Vec::new(),
            results_dir: None,
            timeout: None,
        }
    }

    pub fn with_pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    pub fn with_permission(mut self, permission: FunctionPermission) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn target(&self) -> &FunctionTarget {
        &self.target
    }

    pub fn pull_policy(&self) -> ImagePullPolicy {
        self.pull_policy
    }

    pub fn permission(&self) -> &FunctionPermission {
        &self.permission
    }

    pub fn env(&self) -> &[String] {
        &self.env
    }

    pub fn results_dir(&self) -> Option<&Path> {
        self.results_dir.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse() {
        assert_eq!(
            "ghcr.io/acme/fn:v1".parse::<FunctionTarget>().unwrap(),
            FunctionTarget::Image("ghcr.io/acme/fn:v1".into())
        );
        assert_eq!(
            "exec:./bin/fn".parse::<FunctionTarget>().unwrap(),
            FunctionTarget::Exec(PathBuf::from("./bin/fn"))
        );
        assert_eq!(
            FunctionTarget::Exec(PathBuf::from("/usr/bin/fn")).to_string(),
            "exec:/usr/bin/fn"
        );
    }

    #[test]
    fn test_new_request_is_default_deny() {
        let req = InvocationRequest::new(FunctionTarget::Image("fn".into()));
        assert_eq!(req.pull_policy(), ImagePullPolicy::IfNotPresent);
        assert_eq!(req.permission(), &FunctionPermission::deny_all());
        assert!(req.env().is_empty());
        assert!(req.results_dir().is_none());
        assert!(req.timeout().is_none());
    }

    #[test]
    fn test_builder_sets_fields() {
        let req = InvocationRequest::new(FunctionTarget::Image("fn".into()))
            .with_pull_policy(ImagePullPolicy::Never)
            .with_env(vec!["A=1".to_string(), "HOME".to_string()])
            .with_results_dir("/tmp/results")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(req.pull_policy(), ImagePullPolicy::Never);
        assert_eq!(req.env(), &["A=1".to_string(), "HOME".to_string()]);
        assert_eq!(req.results_dir(), Some(Path::new("/tmp/results")));
        assert_eq!(req.timeout(), Some(Duration::from_secs(5)));
    }
}

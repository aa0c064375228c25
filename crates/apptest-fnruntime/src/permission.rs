//! Permissions granted to a function: the default is to grant nothing.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FnError;

/// Kind of storage made visible inside the function container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

impl std::fmt::Display for MountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountType::Bind => write!(f, "bind"),
            MountType::Volume => write!(f, "volume"),
            MountType::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

/// A single storage mount, written on the command line as
/// `type=bind,src=/host/path,dst=/container/path[,rw=true]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageMount {
    pub mount_type: MountType,
    /// Host path or volume name. Unused for tmpfs.
    pub source: Option<String>,
    pub target: PathBuf,
    pub read_write: bool,
}

impl StorageMount {
    /// The `--mount` value understood by docker-compatible runtimes.
    pub fn to_mount_arg(&self) -> String {
        let mut arg = format!("type={}", self.mount_type);
        if let Some(source) = &self.source {
            arg.push_str(&format!(",source={source}"));
        }
        arg.push_str(&format!(",target={}", self.target.display()));
        if !self.read_write {
            arg.push_str(",readonly");
        }
        arg
    }
}

impl FromStr for StorageMount {
    type Err = FnError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| FnError::InvalidMount {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut mount_type = None;
        let mut source = None;
        let mut target = None;
        let mut read_write = false;

        for field in spec.split(',').filter(|f| !f.is_empty()) {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| invalid("fields must be key=value"))?;
            match key.trim() {
                "type" => {
                    mount_type = Some(match value.trim() {
                        "bind" => MountType::Bind,
                        "volume" => MountType::Volume,
                        "tmpfs" => MountType::Tmpfs,
                        _ => return Err(invalid("type must be bind, volume or tmpfs")),
                    })
                }
                "src" | "source" => source = Some(value.trim().to_string()),
                "dst" | "target" | "destination" => target = Some(PathBuf::from(value.trim())),
                "rw" => {
                    read_write = value
                        .trim()
                        .parse()
                        .map_err(|_| invalid("rw must be true or false"))?
                }
                _ => return Err(invalid("unknown field")),
            }
        }

        let mount_type = mount_type.ok_or_else(|| invalid("missing type"))?;
        let target = target.ok_or_else(|| invalid("missing dst"))?;
        if !target.is_absolute() {
            return Err(invalid("dst must be an absolute path"));
        }
        match mount_type {
            MountType::Bind => match &source {
                Some(src) if PathBuf::from(src).is_absolute() => {}
                Some(_) => return Err(invalid("bind src must be an absolute path")),
                None => return Err(invalid("missing src")),
            },
            MountType::Volume if source.is_none() => return Err(invalid("missing src")),
            _ => {}
        }

        Ok(StorageMount {
            mount_type,
            source,
            target,
            read_write,
        })
    }
}

/// What a function may touch beyond the resource stream on its stdin.
///
/// [`FunctionPermission::default`] denies everything: no network, no mounts,
/// no host executables. Grants are added with the consuming `with_*` methods
/// while the request is built; the value is read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionPermission {
    network: bool,
    mounts: Vec<StorageMount>,
    allow_exec: bool,
    user: Option<String>,
}

impl FunctionPermission {
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub fn with_network(mut self) -> Self {
        self.network = true;
        self
    }

    pub fn with_mount(mut self, mount: StorageMount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn with_mounts(mut self, mounts: impl IntoIterator<Item = StorageMount>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Allow host executables (`exec:` functions) to run.
    pub fn with_exec(mut self) -> Self {
        self.allow_exec = true;
        self
    }

    /// Run the container as `user` (`uid[:gid]` or a name) instead of `nobody`.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn network_allowed(&self) -> bool {
        self.network
    }

    pub fn mounts(&self) -> &[StorageMount] {
        &self.mounts
    }

    pub fn exec_allowed(&self) -> bool {
        self.allow_exec
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_denies_everything() {
        let perm = FunctionPermission::default();
        assert!(!perm.network_allowed());
        assert!(perm.mounts().is_empty());
        assert!(!perm.exec_allowed());
        assert!(perm.user().is_none());
        assert_eq!(perm, FunctionPermission::deny_all());
    }

    #[test]
    fn test_grants_are_explicit() {
        let mount: StorageMount = "type=tmpfs,dst=/scratch".parse().unwrap();
        let perm = FunctionPermission::deny_all()
            .with_network()
            .with_mount(mount.clone())
            .with_exec();
        assert!(perm.network_allowed());
        assert_eq!(perm.mounts(), &[mount]);
        assert!(perm.exec_allowed());
    }

    #[test]
    fn test_parse_bind_mount() {
        let mount: StorageMount = "type=bind,src=/data,dst=/work,rw=true".parse().unwrap();
        assert_eq!(mount.mount_type, MountType::Bind);
        assert_eq!(mount.source.as_deref(), Some("/data"));
        assert_eq!(mount.target, PathBuf::from("/work"));
        assert!(mount.read_write);
        assert_eq!(mount.to_mount_arg(), "type=bind,source=/data,target=/work");
    }

    #[test]
    fn test_mounts_are_readonly_by_default() {
        let mount: StorageMount = "type=volume,src=cache,dst=/cache".parse().unwrap();
        assert_eq!(
            mount.to_mount_arg(),
            "type=volume,source=cache,target=/cache,readonly"
        );
    }

    #[test]
    fn test_parse_rejects_bad_mounts() {
        for bad in [
            "src=/data,dst=/work",
            "type=nfs,src=/data,dst=/work",
            "type=bind,dst=/work",
            "type=bind,src=data,dst=/work",
            "type=bind,src=/data,dst=work",
            "type=bind,src=/data,dst=/work,rw=maybe",
            "type=bind,src=/data,dst=/work,mode=0644",
            "type=bind;src=/data",
        ] {
            assert!(
                matches!(bad.parse::<StorageMount>(), Err(FnError::InvalidMount { .. })),
                "expected {bad:?} to be rejected"
            );
        }
    }
}

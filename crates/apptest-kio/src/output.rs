//! Output routing for function results.
//!
//! The rendered stream can be passed through untouched, unwrapped into plain
//! documents, or laid out as files under a fresh directory.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::codec::{decode, encode, ResourceStream};
use crate::error::{KioError, KioResult};
use crate::resource::Resource;

/// Selector value that writes function output as is.
pub const STDOUT: &str = "stdout";
/// Selector value that writes plain documents without the envelope.
pub const UNWRAP: &str = "unwrap";

/// Where the rendered stream goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Destination {
    /// No selector given. Writes to the writer only for stdin input.
    #[default]
    Unset,
    Stdout,
    Unwrap,
    Directory(PathBuf),
}

impl FromStr for Destination {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" => Destination::Unset,
            STDOUT => Destination::Stdout,
            UNWRAP => Destination::Unwrap,
            dir => Destination::Directory(PathBuf::from(dir)),
        })
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Unset => write!(f, "<unset>"),
            Destination::Stdout => write!(f, "{STDOUT}"),
            Destination::Unwrap => write!(f, "{UNWRAP}"),
            Destination::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}

impl Destination {
    pub fn directory(&self) -> Option<&Path> {
        match self {
            Destination::Directory(dir) => Some(dir),
            _ => None,
        }
    }
}

/// Deliver function output to `destination`.
///
/// `content` is the function's raw stdout. `from_stdin` tells an unset
/// selector whether the input came from standard input, in which case the
/// content is written verbatim; otherwise an unset selector does nothing.
pub fn deliver<W: Write + ?Sized>(
    content: &[u8],
    destination: &Destination,
    from_stdin: bool,
    writer: &mut W,
) -> KioResult<()> {
    match destination {
        Destination::Stdout => write_verbatim(content, writer),
        Destination::Unset if from_stdin => write_verbatim(content, writer),
        Destination::Unset => {
            debug!("no output destination selected, discarding rendered stream");
            Ok(())
        }
        Destination::Unwrap => {
            let stream = decode(content)?;
            writer.write_all(encode(&stream.items, true)?.as_bytes())?;
            writer.flush()?;
            Ok(())
        }
        Destination::Directory(dir) => {
            check_directory_not_present(dir)?;
            let stream = decode(content)?;
            let written = write_to_directory(&stream, dir)?;
            info!(
                dir = %dir.display(),
                files = written.len(),
                "wrote rendered resources"
            );
            Ok(())
        }
    }
}

fn write_verbatim<W: Write + ?Sized>(content: &[u8], writer: &mut W) -> KioResult<()> {
    writer.write_all(content)?;
    writer.flush()?;
    Ok(())
}

/// Fail with [`KioError::DestinationExists`] if anything is at `dir`.
pub fn check_directory_not_present(dir: &Path) -> KioResult<()> {
    match std::fs::symlink_metadata(dir) {
        Ok(_) => Err(KioError::DestinationExists {
            path: dir.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KioError::Io(e)),
    }
}

/// Materialize `stream` under `dir`, one file per path annotation.
///
/// Resources sharing a path land in the same file ordered by index. Every
/// path is validated before anything is created, and `dir` itself is created
/// exclusively: if it appears concurrently the call fails with
/// [`KioError::DestinationExists`]. A write failure removes `dir` again, so a
/// failed call leaves nothing behind. Returns the files written, in
/// first-seen order.
pub fn write_to_directory(stream: &ResourceStream, dir: &Path) -> KioResult<Vec<PathBuf>> {
    let mut order: Vec<PathBuf> = Vec::new();
    let mut groups: HashMap<PathBuf, Vec<&Resource>> = HashMap::new();

    for (position, resource) in stream.iter().enumerate() {
        let relative = match &resource.provenance().path {
            Some(path) => path.clone(),
            None => resource.default_path(position),
        };
        let relative = contained_path(&relative)?;
        if !groups.contains_key(&relative) {
            order.push(relative.clone());
        }
        groups.entry(relative).or_default().push(resource);
    }
    check_no_conflicts(&order)?;

    create_destination(dir)?;
    match write_groups(dir, order, groups) {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_dir_all(dir) {
                warn!(dir = %dir.display(), error = %cleanup, "failed to remove partial output");
            }
            Err(e)
        }
    }
}

fn write_groups(
    dir: &Path,
    order: Vec<PathBuf>,
    mut groups: HashMap<PathBuf, Vec<&Resource>>,
) -> KioResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(order.len());
    for relative in order {
        let mut resources = groups.remove(&relative).unwrap_or_default();
        resources.sort_by_key(|r| r.provenance().index.unwrap_or(usize::MAX));
        let resources: Vec<Resource> = resources.into_iter().cloned().collect();

        let target = dir.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, encode(&resources, true)?)?;
        debug!(path = %target.display(), resources = resources.len(), "wrote resource file");
        written.push(target);
    }
    Ok(written)
}

/// Create the parents of `dir`, then `dir` itself, failing if it exists.
fn create_destination(dir: &Path) -> KioResult<()> {
    if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(KioError::DestinationExists {
                path: dir.to_path_buf(),
            })
        }
        Err(e) => Err(KioError::Io(e)),
    }
}

/// Reject a file path that another path uses as a directory.
fn check_no_conflicts(paths: &[PathBuf]) -> KioResult<()> {
    let files: HashSet<&Path> = paths.iter().map(PathBuf::as_path).collect();
    for path in paths {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            if files.contains(ancestor) {
                return Err(KioError::PathConflict {
                    file: ancestor.display().to_string(),
                    nested: path.display().to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Normalize a path annotation, rejecting anything that would land outside
/// the output directory.
fn contained_path(raw: &str) -> KioResult<PathBuf> {
    let traversal = || KioError::PathTraversal {
        path: raw.to_string(),
    };

    let mut normalized = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(traversal())
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(traversal());
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_from_str() {
        assert_eq!("".parse::<Destination>().unwrap(), Destination::Unset);
        assert_eq!("stdout".parse::<Destination>().unwrap(), Destination::Stdout);
        assert_eq!("unwrap".parse::<Destination>().unwrap(), Destination::Unwrap);
        assert_eq!(
            "out/dir".parse::<Destination>().unwrap(),
            Destination::Directory(PathBuf::from("out/dir"))
        );
    }

    #[test]
    fn test_contained_path() {
        assert_eq!(contained_path("a/./b.yaml").unwrap(), PathBuf::from("a/b.yaml"));
        assert!(matches!(
            contained_path("../escape.yaml"),
            Err(KioError::PathTraversal { .. })
        ));
        assert!(matches!(
            contained_path("a/../../escape.yaml"),
            Err(KioError::PathTraversal { .. })
        ));
        assert!(matches!(
            contained_path("/etc/passwd"),
            Err(KioError::PathTraversal { .. })
        ));
        assert!(matches!(contained_path("."), Err(KioError::PathTraversal { .. })));
    }

    #[test]
    fn test_conflicting_paths() {
        let paths = [PathBuf::from("app"), PathBuf::from("app/b.yaml")];
        assert!(matches!(
            check_no_conflicts(&paths),
            Err(KioError::PathConflict { ref file, ref nested }) if file == "app" && nested == "app/b.yaml"
        ));

        let paths = [PathBuf::from("app.yaml"), PathBuf::from("app/b.yaml")];
        assert!(check_no_conflicts(&paths).is_ok());
    }

    #[test]
    fn test_stdout_is_verbatim() {
        let content = b"kind: ResourceList\nitems: []\n# trailing comment\n";
        let mut out = Vec::new();
        deliver(content, &Destination::Stdout, false, &mut out).unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn test_unset_depends_on_stdin() {
        let content = b"a: 1\n";

        let mut out = Vec::new();
        deliver(content, &Destination::Unset, true, &mut out).unwrap();
        assert_eq!(out, content);

        let mut out = Vec::new();
        deliver(content, &Destination::Unset, false, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_unwrap_strips_annotations() {
        let content = br#"apiVersion: config.kubernetes.io/v1
kind: ResourceList
items:
- a: 1
  metadata:
    annotations:
      config.kubernetes.io/index: '0'
      internal.config.kubernetes.io/index: '0'
"#;
        let mut out = Vec::new();
        deliver(content, &Destination::Unwrap, false, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a: 1\n");
    }

    #[test]
    fn test_unwrap_reports_malformed_output() {
        let mut out = Vec::new();
        let err = deliver(b"a: [\n", &Destination::Unwrap, false, &mut out).unwrap_err();
        assert!(matches!(err, KioError::MalformedInput { .. }));
        assert!(out.is_empty());
    }
}

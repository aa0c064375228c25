//! Input path resolution.

use std::path::{Path, PathBuf};

use crate::error::{RenderError, RenderResult};

/// An input path after symlinks were followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute, symlink-free path.
    pub path: PathBuf,
    /// Whether `path` differs from the given path because a symlink was followed.
    pub was_symlink: bool,
}

/// Resolve `path` to an absolute, symlink-free path.
///
/// Fails with [`RenderError::InputNotFound`] when nothing exists at `path`
/// and with [`RenderError::SymlinkUnresolved`] when `path` is a symlink
/// whose chain does not end at an existing file.
pub fn resolve_symlink(path: &Path) -> RenderResult<ResolvedPath> {
    let meta = std::fs::symlink_metadata(path).map_err(|source| RenderError::InputNotFound {
        path: path.to_path_buf(),
        source,
    })?;

    let was_symlink = meta.file_type().is_symlink();
    let resolved = std::fs::canonicalize(path).map_err(|source| {
        if was_symlink {
            RenderError::SymlinkUnresolved {
                path: path.to_path_buf(),
                source,
            }
        } else {
            RenderError::InputNotFound {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    Ok(ResolvedPath {
        path: resolved,
        was_symlink,
    })
}

//! Error types for the execgate library

use nix::errno::Errno;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving paths and applying policy
#[derive(Error, Debug)]
pub enum ExecGateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("symbolic link loop while resolving {0}")]
    LinkLoop(PathBuf),

    #[error("symbolic link target too long for {0}")]
    LinkTooLong(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("{}: {}", .path.display(), .errno)]
    PathWalk { path: PathBuf, errno: Errno },
}

impl ExecGateError {
    /// The errno equivalent surfaced to intercepted callers.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            ExecGateError::InvalidArgument(_) => Errno::EINVAL,
            ExecGateError::NotFound(_) => Errno::ENOENT,
            ExecGateError::NotADirectory(_) => Errno::ENOTDIR,
            ExecGateError::LinkLoop(_) => Errno::ELOOP,
            ExecGateError::LinkTooLong(_) => Errno::ENOMEM,
            ExecGateError::PermissionDenied(_) => Errno::EACCES,
            ExecGateError::PathWalk { errno, .. } => *errno,
        }
    }

    /// Translate a stat/readlink failure at `path` into the matching error kind.
    pub(crate) fn from_walk(path: &std::path::Path, errno: Errno) -> Self {
        match errno {
            Errno::ENOENT => ExecGateError::NotFound(path.to_path_buf()),
            Errno::ENOTDIR => ExecGateError::NotADirectory(path.to_path_buf()),
            Errno::ELOOP => ExecGateError::LinkLoop(path.to_path_buf()),
            Errno::EACCES => ExecGateError::PermissionDenied(path.to_path_buf()),
            errno => ExecGateError::PathWalk {
                path: path.to_path_buf(),
                errno,
            },
        }
    }
}

/// Result type alias for execgate operations
pub type Result<T> = std::result::Result<T, ExecGateError>;

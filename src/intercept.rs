//! Entry-point adapters.
//!
//! Each adapter normalizes one exec vector (path, search name, descriptor)
//! to a resolved target, runs the decision engine, and hands the resulting
//! plan to dispatch. The C ABI layer wraps these with raw-pointer
//! marshalling; tests call them directly with a recording backend.

use crate::canonical;
use crate::decision;
use crate::dispatch::{self, AllowedVia, ImageReplacer};
use crate::policy::PolicyPaths;
use crate::resolve;
use nix::errno::Errno;
use std::ffi::{CStr, CString, OsStr, OsString};
use std::os::fd::RawFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Intercept an exec addressed by path (`execve`).
pub fn exec_by_path(
    replacer: &dyn ImageReplacer,
    paths: &PolicyPaths,
    path: &CStr,
    argv: &[CString],
    envp: &[CString],
) -> Errno {
    let target = Path::new(OsStr::from_bytes(path.to_bytes()));
    debug!(target = %target.display(), "intercepted execve");

    let plan = decision::decide(paths, target, argv);
    dispatch::dispatch(replacer, &plan, AllowedVia::Path, envp)
}

/// Intercept an exec addressed by bare name (`execvpe`).
///
/// The name is resolved on the caller's search path first; a failed
/// resolution surfaces `ENOENT` (or the recorded `EACCES`) without any
/// image-replacement attempt.
pub fn exec_by_name(
    replacer: &dyn ImageReplacer,
    paths: &PolicyPaths,
    name: &CStr,
    argv: &[CString],
    envp: &[CString],
) -> Errno {
    debug!(name = %name.to_string_lossy(), "intercepted execvpe");

    let resolved = match resolve::resolve(OsStr::from_bytes(name.to_bytes())) {
        Ok(resolved) => resolved,
        Err(err) => {
            debug!(name = %name.to_string_lossy(), %err, "search resolution failed");
            return match err.errno() {
                Errno::EACCES => Errno::EACCES,
                _ => Errno::ENOENT,
            };
        }
    };

    let plan = decision::decide(paths, &resolved, argv);
    dispatch::dispatch(
        replacer,
        &plan,
        AllowedVia::Search {
            name,
            resolved: &resolved,
        },
        envp,
    )
}

/// Intercept an exec addressed by open descriptor (`fexecve`).
///
/// The descriptor is converted to a path through `/proc/self/fd`; a negative
/// descriptor or an unreadable link is `EINVAL`.
pub fn exec_by_descriptor(
    replacer: &dyn ImageReplacer,
    paths: &PolicyPaths,
    fd: RawFd,
    argv: &[CString],
    envp: &[CString],
) -> Errno {
    if fd < 0 {
        return Errno::EINVAL;
    }

    let fd_link = PathBuf::from(format!("/proc/self/fd/{fd}"));
    let resolved = match canonical::read_link_bounded(&fd_link, 2048) {
        Ok(bytes) => PathBuf::from(OsString::from_vec(bytes)),
        Err(err) => {
            debug!(fd, %err, "descriptor target unreadable");
            return Errno::EINVAL;
        }
    };
    debug!(fd, target = %resolved.display(), "intercepted fexecve");

    let plan = decision::decide(paths, &resolved, argv);
    dispatch::dispatch(
        replacer,
        &plan,
        AllowedVia::Descriptor {
            fd,
            resolved: &resolved,
        },
        envp,
    )
}

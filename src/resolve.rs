//! Search-path lookup for bare program names.

use crate::canonical;
use crate::error::{ExecGateError, Result};
use nix::errno::Errno;
use nix::unistd::{access, AccessFlags};
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;
use tracing::debug;

/// Locate `name` the way the exec family would.
///
/// A name containing a separator is canonicalized directly. Anything else is
/// probed for execute permission against each entry of `PATH` in order, where
/// a leading, trailing or doubled `:` selects the current directory. The
/// first hit wins; a permission-denied probe is remembered and surfaced when
/// the whole search comes up empty.
pub fn resolve(name: &OsStr) -> Result<PathBuf> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(ExecGateError::NotFound(PathBuf::new()));
    }
    if bytes.contains(&b'/') {
        return canonical::realpath(name);
    }

    let search = std::env::var_os("PATH").unwrap_or_else(default_search_path);
    let mut saw_permission_denied = false;

    for dir in search.as_bytes().split(|&b| b == b':') {
        let mut candidate = Vec::with_capacity(dir.len() + bytes.len() + 1);
        if !dir.is_empty() {
            candidate.extend_from_slice(dir);
            candidate.push(b'/');
        }
        candidate.extend_from_slice(bytes);
        let candidate = PathBuf::from(OsString::from_vec(candidate));

        match access(&candidate, AccessFlags::X_OK) {
            Ok(()) => {
                debug!(name = %name.to_string_lossy(), hit = %candidate.display(), "search path resolved");
                return Ok(candidate);
            }
            Err(Errno::EACCES) => saw_permission_denied = true,
            // Missing or unusable entries mean "try the next directory",
            // including the odd errno some network filesystems report.
            Err(
                Errno::ENOENT
                | Errno::ENAMETOOLONG
                | Errno::ENOTDIR
                | Errno::ELOOP
                | Errno::EROFS
                | Errno::ETXTBSY,
            ) => {}
            Err(errno) => {
                debug!(probe = %candidate.display(), %errno, "search aborted");
                return Err(ExecGateError::NotFound(PathBuf::from(name)));
            }
        }
    }

    if saw_permission_denied {
        Err(ExecGateError::PermissionDenied(PathBuf::from(name)))
    } else {
        Err(ExecGateError::NotFound(PathBuf::from(name)))
    }
}

/// The system default search path used when `PATH` is unset: the current
/// directory followed by whatever `confstr(_CS_PATH)` reports.
fn default_search_path() -> OsString {
    // SAFETY: a null buffer only queries the required length.
    let len = unsafe { libc::confstr(libc::_CS_PATH, std::ptr::null_mut(), 0) };
    let mut buf = vec![0u8; len.max(1)];
    // SAFETY: buf is writable for its full length.
    unsafe { libc::confstr(libc::_CS_PATH, buf.as_mut_ptr().cast(), buf.len()) };
    while buf.last() == Some(&0) {
        buf.pop();
    }

    let mut path = vec![b':'];
    path.extend_from_slice(&buf);
    OsString::from_vec(path)
}

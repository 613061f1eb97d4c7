//! Dispatch of a split execution.
//!
//! The forbidden half is signalled to the supervisor by attempting a fake
//! image replacement on a sentinel path; the attempt is expected to fail and
//! its errno is discarded. The allowed half is then executed for real. When
//! both halves exist the notification strictly precedes the allowed exec, so
//! the supervisor observes the forbidden intent before any successor image
//! runs.

use crate::decision::{ExecCall, ExecutionPlan};
use nix::errno::Errno;
use std::ffi::{CStr, CString};
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Prefix of the synthetic paths used to signal forbidden executions.
///
/// The supervisor watches exec attempts below this prefix; the path never
/// exists, so the attempt returns and the intercepted process lives on.
pub const SENTINEL_PREFIX: &str = "/firejail/denied/";

/// Image-replacement backend.
///
/// Implementations perform (or record) the final exec. Every method returns
/// the errno of a failed attempt; a successful attempt never returns.
pub trait ImageReplacer {
    /// Replace the image by absolute or relative path (`execve`).
    fn exec_path(&self, path: &CStr, argv: &[CString], envp: &[CString]) -> Errno;
    /// Replace the image by search-path lookup (`execvpe`).
    fn exec_search(&self, name: &CStr, argv: &[CString], envp: &[CString]) -> Errno;
    /// Replace the image from an open descriptor (`fexecve`).
    fn exec_fd(&self, fd: RawFd, argv: &[CString], envp: &[CString]) -> Errno;
}

/// How the intercepted caller addressed the allowed half.
///
/// When the allowed target is unchanged from what the caller's own vector
/// would resolve, that vector is replayed verbatim so libc-level semantics
/// (search retries, descriptor identity) are preserved. A rewritten target
/// always goes through the path vector.
pub enum AllowedVia<'a> {
    Path,
    Search { name: &'a CStr, resolved: &'a Path },
    Descriptor { fd: RawFd, resolved: &'a Path },
}

/// Perform at most two image-replacement attempts for `plan`.
///
/// Returns the errno to surface to the intercepted caller: the allowed
/// half's exec errno, or `EACCES` when the whole call was delegated.
pub fn dispatch(
    replacer: &dyn ImageReplacer,
    plan: &ExecutionPlan,
    via: AllowedVia<'_>,
    envp: &[CString],
) -> Errno {
    if let Some(forbidden) = &plan.forbidden {
        notify_supervisor(replacer, forbidden, envp);
    }

    let Some(allowed) = &plan.allowed else {
        return Errno::EACCES;
    };
    let target = match CString::new(allowed.target.as_os_str().as_bytes()) {
        Ok(target) => target,
        Err(_) => return Errno::EINVAL,
    };

    match via {
        AllowedVia::Path => replacer.exec_path(&target, &allowed.argv, envp),
        AllowedVia::Search { name, resolved } if allowed.target.as_path() == resolved => {
            replacer.exec_search(name, &allowed.argv, envp)
        }
        AllowedVia::Descriptor { fd, resolved } if allowed.target.as_path() == resolved => {
            replacer.exec_fd(fd, &allowed.argv, envp)
        }
        AllowedVia::Search { .. } | AllowedVia::Descriptor { .. } => {
            replacer.exec_path(&target, &allowed.argv, envp)
        }
    }
}

/// Best-effort sentinel exec; the error is logged and swallowed.
fn notify_supervisor(replacer: &dyn ImageReplacer, forbidden: &ExecCall, envp: &[CString]) {
    let mut bytes = SENTINEL_PREFIX.as_bytes().to_vec();
    bytes.extend_from_slice(forbidden.target.as_os_str().as_bytes());

    match CString::new(bytes) {
        Ok(sentinel) => {
            let errno = replacer.exec_path(&sentinel, &forbidden.argv, envp);
            debug!(
                target = %forbidden.target.display(),
                %errno,
                "supervisor notified of forbidden execution"
            );
        }
        Err(_) => {
            warn!(
                target = %forbidden.target.display(),
                "forbidden target not representable as a sentinel path"
            );
        }
    }
}

/// Backend that performs real image replacement through the next definition
/// of each exec symbol, resolved once and memoized.
pub struct RealExec;

type ExecveFn = unsafe extern "C" fn(
    *const libc::c_char,
    *const *const libc::c_char,
    *const *const libc::c_char,
) -> libc::c_int;
type FexecveFn = unsafe extern "C" fn(
    libc::c_int,
    *const *const libc::c_char,
    *const *const libc::c_char,
) -> libc::c_int;

fn next_symbol(name: &CStr) -> usize {
    // SAFETY: dlsym with RTLD_NEXT only inspects the loader's search order.
    unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) as usize }
}

fn next_execve() -> Option<ExecveFn> {
    static NEXT: OnceLock<usize> = OnceLock::new();
    let addr = *NEXT.get_or_init(|| next_symbol(c"execve"));
    // SAFETY: the address came from dlsym for this exact signature.
    (addr != 0).then(|| unsafe { std::mem::transmute::<usize, ExecveFn>(addr) })
}

fn next_execvpe() -> Option<ExecveFn> {
    static NEXT: OnceLock<usize> = OnceLock::new();
    let addr = *NEXT.get_or_init(|| next_symbol(c"execvpe"));
    // SAFETY: the address came from dlsym for this exact signature.
    (addr != 0).then(|| unsafe { std::mem::transmute::<usize, ExecveFn>(addr) })
}

fn next_fexecve() -> Option<FexecveFn> {
    static NEXT: OnceLock<usize> = OnceLock::new();
    let addr = *NEXT.get_or_init(|| next_symbol(c"fexecve"));
    // SAFETY: the address came from dlsym for this exact signature.
    (addr != 0).then(|| unsafe { std::mem::transmute::<usize, FexecveFn>(addr) })
}

/// NULL-terminated pointer array over a CString slice.
fn pointer_vec(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

impl ImageReplacer for RealExec {
    fn exec_path(&self, path: &CStr, argv: &[CString], envp: &[CString]) -> Errno {
        let Some(next) = next_execve() else {
            return Errno::ENOSYS;
        };
        let argv_ptrs = pointer_vec(argv);
        let envp_ptrs = pointer_vec(envp);
        // SAFETY: all pointers reference NUL-terminated strings that outlive
        // the call; both arrays are NULL-terminated.
        unsafe { next(path.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr()) };
        Errno::last()
    }

    fn exec_search(&self, name: &CStr, argv: &[CString], envp: &[CString]) -> Errno {
        let Some(next) = next_execvpe() else {
            return Errno::ENOSYS;
        };
        let argv_ptrs = pointer_vec(argv);
        let envp_ptrs = pointer_vec(envp);
        // SAFETY: as above.
        unsafe { next(name.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr()) };
        Errno::last()
    }

    fn exec_fd(&self, fd: RawFd, argv: &[CString], envp: &[CString]) -> Errno {
        let Some(next) = next_fexecve() else {
            return Errno::ENOSYS;
        };
        let argv_ptrs = pointer_vec(argv);
        let envp_ptrs = pointer_vec(envp);
        // SAFETY: as above.
        unsafe { next(fd, argv_ptrs.as_ptr(), envp_ptrs.as_ptr()) };
        Errno::last()
    }
}

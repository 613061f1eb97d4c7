//! C ABI interposition layer.
//!
//! Defines `execve`, `execvpe` and `fexecve` with the libc prototypes so the
//! dynamic linker resolves intercepted calls here when the library is
//! preloaded. These functions only marshal raw pointers into owned values,
//! delegate to the adapters, and surface the resulting errno.
//!
//! # Safety
//!
//! Callers uphold the libc contracts: `path`/`name` point at NUL-terminated
//! strings and `argv`/`envp` are NULL-terminated pointer arrays (a NULL
//! `envp` is tolerated and treated as empty).

use crate::dispatch::RealExec;
use crate::intercept;
use crate::policy::PolicyPaths;
use crate::trace;
use nix::errno::Errno;
use std::ffi::{c_char, c_int, CStr, CString};

/// Copy a NULL-terminated pointer array into owned strings.
unsafe fn collect_strings(mut array: *const *const c_char) -> Vec<CString> {
    let mut strings = Vec::new();
    if array.is_null() {
        return strings;
    }
    while !(*array).is_null() {
        strings.push(CStr::from_ptr(*array).to_owned());
        array = array.add(1);
    }
    strings
}

fn fail_with(errno: Errno) -> c_int {
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe { *libc::__errno_location() = errno as c_int };
    -1
}

/// Interposed `execve(2)`.
///
/// # Safety
///
/// See the module contract.
#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    trace::init();
    if path.is_null() || argv.is_null() {
        return fail_with(Errno::EINVAL);
    }

    let path = CStr::from_ptr(path).to_owned();
    let argv = collect_strings(argv);
    let envp = collect_strings(envp);

    let errno = intercept::exec_by_path(&RealExec, &PolicyPaths::default(), &path, &argv, &envp);
    fail_with(errno)
}

/// Interposed `execvpe(3)`; `execvp` funnels here inside libc builds that
/// route it through the preloadable symbol.
///
/// # Safety
///
/// See the module contract.
#[no_mangle]
pub unsafe extern "C" fn execvpe(
    name: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    trace::init();
    if name.is_null() || argv.is_null() {
        return fail_with(Errno::EINVAL);
    }

    let name = CStr::from_ptr(name).to_owned();
    let argv = collect_strings(argv);
    let envp = collect_strings(envp);

    let errno = intercept::exec_by_name(&RealExec, &PolicyPaths::default(), &name, &argv, &envp);
    fail_with(errno)
}

/// Interposed `fexecve(3)`.
///
/// # Safety
///
/// See the module contract.
#[no_mangle]
pub unsafe extern "C" fn fexecve(
    fd: c_int,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    trace::init();
    if argv.is_null() {
        return fail_with(Errno::EINVAL);
    }

    let argv = collect_strings(argv);
    let envp = collect_strings(envp);

    let errno =
        intercept::exec_by_descriptor(&RealExec, &PolicyPaths::default(), fd, &argv, &envp);
    fail_with(errno)
}

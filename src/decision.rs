//! Per-call execution decisions.
//!
//! Splits one intercepted exec call into an allowed and a forbidden half.
//! The target binary is classified against the helpers and managed-bins
//! lists (plus the association registry); each argument is then checked
//! against the managed-files list. Any tag outside the permitted set widens
//! the whole call into the forbidden half so the supervisor can mediate with
//! the user instead of the call being silently stripped.

use crate::assoc::{self, AssociationRegistry};
use crate::canonical;
use crate::policy::{self, cache, ExecPolicy, PolicyPaths, DEFAULT_TARGET_POLICY};
use nix::errno::Errno;
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One half of a split execution: a target and the argv to run it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub target: PathBuf,
    pub argv: Vec<CString>,
}

impl ExecCall {
    fn new(target: &Path, argv: &[CString]) -> Self {
        ExecCall {
            target: target.to_path_buf(),
            argv: argv.to_vec(),
        }
    }
}

/// The outcome of [`decide`]: at most one half is populated.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub allowed: Option<ExecCall>,
    pub forbidden: Option<ExecCall>,
}

impl ExecutionPlan {
    fn allow(target: &Path, argv: &[CString]) -> Self {
        ExecutionPlan {
            allowed: Some(ExecCall::new(target, argv)),
            forbidden: None,
        }
    }

    fn forbid(target: &Path, argv: &[CString]) -> Self {
        ExecutionPlan {
            allowed: None,
            forbidden: Some(ExecCall::new(target, argv)),
        }
    }
}

/// Split the requested execution of `target` with `argv` into allowed and
/// forbidden halves.
pub fn decide(paths: &PolicyPaths, target: &Path, argv: &[CString]) -> ExecutionPlan {
    let target_tag = classify_target(paths, target);
    let policy = DEFAULT_TARGET_POLICY;

    let clear = (target_tag == ExecPolicy::HELPERS && policy.contains(ExecPolicy::HELPERS))
        || (target_tag == ExecPolicy::SANDBOX_MANAGED
            && policy.contains(ExecPolicy::SANDBOX_MANAGED))
        || policy.contains(ExecPolicy::UNSPECIFIED);
    if !clear {
        debug!(target = %target.display(), "target refused outright");
        return ExecutionPlan::forbid(target, argv);
    }

    let decisions = classify_call(paths, target_tag, argv);
    let permitted = ExecPolicy::HELPERS | ExecPolicy::UNSPECIFIED;
    let forbidden_bearing = decisions.iter().any(|tag| !tag.intersects(permitted));

    if forbidden_bearing {
        debug!(
            target = %target.display(),
            "delegating the whole call, target or arguments are sandbox-managed"
        );
        ExecutionPlan::forbid(target, argv)
    } else {
        ExecutionPlan::allow(target, argv)
    }
}

/// Tag for the target binary itself.
///
/// Helpers come from the helpers list or from the association registry (a
/// binary may always spawn the members of its own group); managed binaries
/// come from the managed-bins list; everything else is unspecified.
fn classify_target(paths: &PolicyPaths, target: &Path) -> ExecPolicy {
    let bytes = target.as_os_str().as_bytes();

    let listed_helper = cache::read_list(&paths.helper_bins)
        .is_some_and(|list| policy::list_contains_path(&list, bytes));
    if listed_helper
        || AssociationRegistry::shared().is_associated(&assoc::self_binary_path(), target)
    {
        return ExecPolicy::HELPERS;
    }

    let managed = cache::read_list(&paths.managed_bins)
        .is_some_and(|list| policy::list_contains_path(&list, bytes));
    if managed {
        ExecPolicy::SANDBOX_MANAGED
    } else {
        ExecPolicy::UNSPECIFIED
    }
}

/// Tags for the whole call, index 0 being the target.
fn classify_call(paths: &PolicyPaths, target_tag: ExecPolicy, argv: &[CString]) -> Vec<ExecPolicy> {
    let mut tags = Vec::with_capacity(argv.len().max(1));
    tags.push(target_tag);

    let arguments = argv.get(1..).unwrap_or_default();
    match cache::read_list(&paths.managed_files) {
        Some(managed) => {
            for argument in arguments {
                tags.push(classify_argument(&managed, argument));
            }
        }
        // Without a managed-files list every argument is unrestricted.
        None => tags.extend(std::iter::repeat(ExecPolicy::UNSPECIFIED).take(arguments.len())),
    }
    tags
}

/// Tag for one argument.
///
/// The argument is treated as naming a file when it contains a separator,
/// when its canonical form exists, or when the existence probe fails in a way
/// that implies existence (permission, loop or overflow errors). Arguments
/// whose canonicalization fails are simply not file-like; a malformed
/// argument must not mask the policy decision.
fn classify_argument(managed: &[u8], argument: &CStr) -> ExecPolicy {
    let bytes = argument.to_bytes();
    if bytes.is_empty() {
        return ExecPolicy::UNSPECIFIED;
    }

    let canonical_form = canonical::realpath(std::ffi::OsStr::from_bytes(bytes)).ok();

    let mut file_like = bytes.contains(&b'/');
    if !file_like {
        file_like = match &canonical_form {
            Some(path) => match nix::sys::stat::stat(path.as_path()) {
                Ok(_) => true,
                Err(errno) => {
                    matches!(errno, Errno::EACCES | Errno::ELOOP | Errno::EOVERFLOW)
                }
            },
            None => false,
        };
    }

    if file_like {
        if let Some(path) = &canonical_form {
            if policy::list_contains_path(managed, path.as_os_str().as_bytes()) {
                return ExecPolicy::SANDBOX_MANAGED;
            }
        }
    }
    ExecPolicy::UNSPECIFIED
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn cstr(text: &str) -> CString {
        CString::new(text).expect("no interior NUL")
    }

    /// Policy paths pointing into a private temp directory; lists not written
    /// behave as absent.
    fn policy_paths(dir: &Path) -> PolicyPaths {
        PolicyPaths {
            helper_bins: dir.join("helper-bins.list"),
            managed_bins: dir.join("managed-bins.list"),
            managed_files: dir.join("managed-files.list"),
        }
    }

    #[test]
    fn test_unlisted_target_with_clean_arguments_is_allowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = policy_paths(dir.path());

        let argv = vec![cstr("tool"), cstr("--version")];
        let plan = decide(&paths, Path::new("/usr/bin/tool"), &argv);

        let allowed = plan.allowed.expect("allowed half");
        assert_eq!(allowed.target, PathBuf::from("/usr/bin/tool"));
        assert_eq!(allowed.argv, argv);
        assert!(plan.forbidden.is_none());
    }

    #[test]
    fn test_managed_binary_is_delegated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = policy_paths(dir.path());
        fs::write(&paths.managed_bins, b"/usr/bin/vlc\n").expect("write list");

        let argv = vec![cstr("vlc")];
        let plan = decide(&paths, Path::new("/usr/bin/vlc"), &argv);

        assert!(plan.allowed.is_none());
        let forbidden = plan.forbidden.expect("forbidden half");
        assert_eq!(forbidden.target, PathBuf::from("/usr/bin/vlc"));
    }

    #[test]
    fn test_managed_file_argument_widens_the_whole_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical tempdir");
        let paths = policy_paths(dir.path());
        let restricted = root.join("restricted");
        fs::write(
            &paths.managed_files,
            format!("{}\n", restricted.display()),
        )
        .expect("write list");
        fs::write(&paths.helper_bins, b"/usr/bin/vlc\n").expect("write list");

        let secret = restricted.join("song.mp3");
        let argv = vec![cstr("vlc"), cstr(secret.to_str().expect("utf-8 path"))];
        let plan = decide(&paths, Path::new("/usr/bin/vlc"), &argv);

        // Conservative widening: no partial execution.
        assert!(plan.allowed.is_none());
        let forbidden = plan.forbidden.expect("forbidden half");
        assert_eq!(forbidden.argv, argv);
    }

    #[test]
    fn test_subtree_and_sibling_argument_classification() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical tempdir");
        let paths = policy_paths(dir.path());
        let a = root.join("a");
        let b = root.join("b");
        fs::write(
            &paths.managed_files,
            format!("{}\n{}\n", a.display(), b.display()),
        )
        .expect("write list");

        let managed = cache::read_list(&paths.managed_files).expect("list readable");

        let below = b.join("sub/file");
        assert_eq!(
            classify_argument(&managed, &cstr(below.to_str().expect("utf-8"))),
            ExecPolicy::SANDBOX_MANAGED
        );
        let sibling = root.join("c");
        assert_eq!(
            classify_argument(&managed, &cstr(sibling.to_str().expect("utf-8"))),
            ExecPolicy::UNSPECIFIED
        );
    }

    #[test]
    fn test_non_file_arguments_stay_unspecified() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = policy_paths(dir.path());
        fs::write(&paths.managed_files, b"/secret\n").expect("write list");
        let managed = cache::read_list(&paths.managed_files).expect("list readable");

        assert_eq!(
            classify_argument(&managed, &cstr("--loop")),
            ExecPolicy::UNSPECIFIED
        );
        assert_eq!(classify_argument(&managed, &cstr("")), ExecPolicy::UNSPECIFIED);
    }

    #[test]
    fn test_helpers_list_clears_the_target() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = policy_paths(dir.path());
        fs::write(&paths.helper_bins, b"/usr/bin/firefox\n").expect("write list");
        // Listing the binary as managed as well must not override the helper
        // classification.
        fs::write(&paths.managed_bins, b"/usr/bin/firefox\n").expect("write list");

        let argv = vec![cstr("firefox")];
        let plan = decide(&paths, Path::new("/usr/bin/firefox"), &argv);
        assert!(plan.allowed.is_some());
        assert!(plan.forbidden.is_none());
    }
}

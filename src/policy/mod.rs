//! Execution-policy vocabulary: per-argument tags, policy-file locations and
//! the prefix-on-separator membership test shared by the three lists.

pub mod cache;

use bitflags::bitflags;
use std::path::PathBuf;

bitflags! {
    /// Classification tags assigned to the target binary and each argument of
    /// an intercepted exec call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExecPolicy: u32 {
        /// The path is an authorised helper of the running application.
        const HELPERS = 1;
        /// The path is not covered by any list.
        const UNSPECIFIED = 1 << 1;
        /// The path must be delegated to the sandbox supervisor.
        const SANDBOX_MANAGED = 1 << 2;
        /// The path is the sandbox supervisor itself.
        const SANDBOX_ITSELF = 1 << 3;
    }
}

impl ExecPolicy {
    /// No classification at all.
    pub const NOTHING: ExecPolicy = ExecPolicy::empty();
}

/// Tags a target binary may carry while still being executed in-sandbox.
pub const DEFAULT_TARGET_POLICY: ExecPolicy =
    ExecPolicy::HELPERS.union(ExecPolicy::UNSPECIFIED);

/// Binaries the running application may invoke directly.
pub const HELPER_BINS_LIST: &str = "/etc/firejail/self/helper-bins.list";
/// Binaries that must be delegated to the supervisor.
pub const MANAGED_BINS_LIST: &str = "/etc/firejail/self/managed-bins.list";
/// Files that must not be opened inside the sandbox.
pub const MANAGED_FILES_LIST: &str = "/etc/firejail/self/managed-files.list";

/// Reserved for handing the association table to the supervisor.
pub const ENV_ASSOCIATIONS: &str = "FIREJAIL_ASSOCIATIONS";
/// Reserved for handing the managed-binaries list to the supervisor.
pub const ENV_SANDBOX_MANAGED: &str = "FIREJAIL_SANDBOX_MANAGED";
/// Reserved for handing the managed-files list to the supervisor.
pub const ENV_SANDBOX_FILES: &str = "FIREJAIL_SANDBOX_FILES";

/// Locations of the three policy lists consulted per call.
///
/// The defaults point at the fixed provisioning paths; tests and embedders
/// may substitute their own copies.
#[derive(Debug, Clone)]
pub struct PolicyPaths {
    pub helper_bins: PathBuf,
    pub managed_bins: PathBuf,
    pub managed_files: PathBuf,
}

impl Default for PolicyPaths {
    fn default() -> Self {
        PolicyPaths {
            helper_bins: PathBuf::from(HELPER_BINS_LIST),
            managed_bins: PathBuf::from(MANAGED_BINS_LIST),
            managed_files: PathBuf::from(MANAGED_FILES_LIST),
        }
    }
}

/// Whether `candidate` equals `entry` or extends it across a `/` boundary.
///
/// `/a` matches `/a` and `/a/b` but not `/ab`; entries therefore behave as
/// directory-subtree prefixes as well as exact paths.
#[must_use]
pub fn prefix_on_separator(candidate: &[u8], entry: &[u8]) -> bool {
    if entry.is_empty() || !candidate.starts_with(entry) {
        return false;
    }
    matches!(candidate.get(entry.len()), None | Some(&b'/'))
}

/// Membership of `candidate` in a newline-separated policy list.
///
/// Empty lines are skipped: an empty entry would otherwise act as a prefix of
/// every path.
#[must_use]
pub fn list_contains_path(list: &[u8], candidate: &[u8]) -> bool {
    list.split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .any(|line| prefix_on_separator(candidate, line))
}

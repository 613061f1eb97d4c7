//! Symlink-aware path canonicalization with cycle detection.
//!
//! Resolves a user-supplied name to an absolute path with no `.`, `..`,
//! repeated separators or (unless asked otherwise) symbolic links. Component
//! existence requirements are selectable so that callers can classify
//! hypothetical paths whose tails do not exist yet.

use crate::error::{ExecGateError, Result};
use bitflags::bitflags;
use nix::errno::Errno;
use nix::sys::stat::{lstat, stat};
use std::collections::HashMap;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

bitflags! {
    /// Resolution flags: exactly one of the three mode bits must be set,
    /// `NOLINKS` combines with any of them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CanonFlags: u32 {
        /// Every component must exist.
        const EXISTING = 1;
        /// Every component but the last must exist.
        const ALL_BUT_LAST = 1 << 1;
        /// No existence requirement.
        const MISSING = 1 << 2;
        /// Do not expand symbolic links.
        const NOLINKS = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Existing,
    AllButLast,
    Missing,
}

/// Canonical absolute form of `name` under the given flags.
///
/// A leading `~/` expands to `$HOME`; a relative name is anchored at the
/// current working directory. Symlink cycles are detected by remembering the
/// `(input, device, inode)` triple of every link followed during one walk:
/// the same link may legitimately appear twice, the same link for the same
/// input may not.
pub fn canonicalize(name: &OsStr, flags: CanonFlags) -> Result<PathBuf> {
    let mode = match (
        flags.contains(CanonFlags::EXISTING),
        flags.contains(CanonFlags::ALL_BUT_LAST),
        flags.contains(CanonFlags::MISSING),
    ) {
        (true, false, false) => Mode::Existing,
        (false, true, false) => Mode::AllButLast,
        (false, false, true) => Mode::Missing,
        _ => {
            return Err(ExecGateError::InvalidArgument(
                "exactly one resolution mode must be set",
            ))
        }
    };
    let resolve_links = !flags.contains(CanonFlags::NOLINKS);

    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err(ExecGateError::NotFound(PathBuf::new()));
    }

    let (mut out, mut rest): (Vec<u8>, Vec<u8>) = if bytes[0] == b'/' {
        (vec![b'/'], bytes.to_vec())
    } else if bytes[0] == b'~' {
        if bytes.get(1) != Some(&b'/') {
            return Err(ExecGateError::InvalidArgument(
                "~ must be followed by a path separator",
            ));
        }
        let home = std::env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .ok_or(ExecGateError::InvalidArgument("HOME is not set"))?;
        (home.into_vec(), bytes[2..].to_vec())
    } else {
        let cwd = std::env::current_dir().map_err(|err| ExecGateError::PathWalk {
            path: PathBuf::from("."),
            errno: Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO)),
        })?;
        (cwd.into_os_string().into_vec(), bytes.to_vec())
    };

    let mut pos = 0usize;
    // Keyed by the input string as of the most recent link splice.
    let mut cycle_key = bytes.to_vec();
    let mut seen: HashMap<Vec<u8>, (u64, u64)> = HashMap::new();

    while pos < rest.len() {
        while pos < rest.len() && rest[pos] == b'/' {
            pos += 1;
        }
        let start = pos;
        while pos < rest.len() && rest[pos] != b'/' {
            pos += 1;
        }
        if pos == start {
            break;
        }
        let component = &rest[start..pos];

        if component == b"." {
            continue;
        }
        if component == b".." {
            pop_last_component(&mut out);
            continue;
        }

        if out.last() != Some(&b'/') {
            out.push(b'/');
        }
        out.extend_from_slice(component);

        if mode == Mode::Missing && !resolve_links {
            // Neither resolving links nor checking existence: no stat needed.
            continue;
        }

        let stat_result = {
            let here = Path::new(OsStr::from_bytes(&out));
            if resolve_links {
                lstat(here)
            } else {
                stat(here)
            }
        };
        let st = match stat_result {
            Ok(st) => st,
            Err(errno) => match mode {
                Mode::Existing => {
                    return Err(ExecGateError::from_walk(
                        Path::new(OsStr::from_bytes(&out)),
                        errno,
                    ))
                }
                Mode::AllButLast => {
                    let only_separators_left = rest[pos..].iter().all(|&b| b == b'/');
                    if !only_separators_left || errno != Errno::ENOENT {
                        return Err(ExecGateError::from_walk(
                            Path::new(OsStr::from_bytes(&out)),
                            errno,
                        ));
                    }
                    continue;
                }
                Mode::Missing => continue,
            },
        };

        let file_type = st.st_mode & libc::S_IFMT;
        if resolve_links && file_type == libc::S_IFLNK {
            let identity = (st.st_dev as u64, st.st_ino as u64);
            if seen.get(&cycle_key) == Some(&identity) {
                if mode == Mode::Missing {
                    // Leave the looping link unresolved.
                    continue;
                }
                return Err(ExecGateError::LinkLoop(path_from(&out)));
            }
            seen.insert(cycle_key.clone(), identity);

            let link = path_from(&out);
            let hint = usize::try_from(st.st_size).unwrap_or(0);
            let target = match read_link_bounded(&link, hint) {
                Ok(target) => target,
                Err(err) => {
                    if mode == Mode::Missing && !matches!(err, ExecGateError::LinkTooLong(_)) {
                        continue;
                    }
                    return Err(err);
                }
            };

            // Splice the link target in front of the unprocessed remainder.
            let mut spliced = target.clone();
            spliced.extend_from_slice(&rest[pos..]);
            if target.first() == Some(&b'/') {
                out.clear();
                out.push(b'/');
            } else {
                pop_last_component(&mut out);
            }
            cycle_key.clone_from(&spliced);
            rest = spliced;
            pos = 0;
            continue;
        }

        if file_type != libc::S_IFDIR && pos < rest.len() && mode != Mode::Missing {
            return Err(ExecGateError::NotADirectory(path_from(&out)));
        }
    }

    Ok(PathBuf::from(OsString::from_vec(out)))
}

/// Canonical form of `name` for classification purposes.
///
/// Two passes: the first normalizes without chasing links so that components
/// which do not exist yet survive, the second resolves the links in the
/// portions that do exist.
pub fn realpath(name: &OsStr) -> Result<PathBuf> {
    let logical = canonicalize(name, CanonFlags::MISSING | CanonFlags::NOLINKS)?;
    canonicalize(logical.as_os_str(), CanonFlags::MISSING)
}

/// Read a symbolic link with a growing buffer.
///
/// Starts near the symlink-max heuristic, doubles on truncation up to a
/// 4096-byte ceiling and fails `LinkTooLong` beyond it.
pub(crate) fn read_link_bounded(path: &Path, size_hint: usize) -> Result<Vec<u8>> {
    const CEILING: usize = 4096;
    const INITIAL_LIMIT: usize = 1025;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ExecGateError::InvalidArgument("path contains an interior NUL byte"))?;
    let mut buf_size = if size_hint < INITIAL_LIMIT {
        size_hint + 1
    } else {
        INITIAL_LIMIT
    };

    loop {
        let mut buf = vec![0u8; buf_size];
        // SAFETY: c_path is NUL-terminated and buf is writable for buf_size bytes.
        let read = unsafe { libc::readlink(c_path.as_ptr(), buf.as_mut_ptr().cast(), buf_size) };
        if read < 0 {
            let errno = Errno::last();
            if errno != Errno::ERANGE {
                return Err(ExecGateError::from_walk(path, errno));
            }
        } else {
            let len = read as usize;
            if len < buf_size {
                buf.truncate(len);
                return Ok(buf);
            }
        }

        if buf_size <= CEILING / 2 {
            buf_size *= 2;
        } else if buf_size < CEILING {
            buf_size = CEILING;
        } else {
            return Err(ExecGateError::LinkTooLong(path.to_path_buf()));
        }
    }
}

/// Drop the trailing component of `out`, leaving the root untouched.
fn pop_last_component(out: &mut Vec<u8>) {
    while out.len() > 1 && out[out.len() - 1] != b'/' {
        out.pop();
    }
    if out.len() > 1 {
        out.pop();
    }
}

fn path_from(bytes: &[u8]) -> PathBuf {
    PathBuf::from(OsStr::from_bytes(bytes).to_os_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;

    fn canon_bytes(path: &Path) -> Vec<u8> {
        path.as_os_str().as_bytes().to_vec()
    }

    #[test]
    fn test_exactly_one_mode_required() {
        let name = OsStr::new("/tmp");
        let both = CanonFlags::EXISTING | CanonFlags::MISSING;
        assert!(matches!(
            canonicalize(name, both),
            Err(ExecGateError::InvalidArgument(_))
        ));
        assert!(matches!(
            canonicalize(name, CanonFlags::NOLINKS),
            Err(ExecGateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_name_is_not_found() {
        assert!(matches!(
            canonicalize(OsStr::new(""), CanonFlags::MISSING),
            Err(ExecGateError::NotFound(_))
        ));
    }

    #[test]
    fn test_tilde_expansion() {
        // Sole user of HOME in this test binary.
        std::env::set_var("HOME", "/home/u");
        let resolved =
            realpath(OsStr::new("~/docs/./../docs")).expect("tilde expansion resolves");
        assert_eq!(resolved, PathBuf::from("/home/u/docs"));

        assert!(matches!(
            canonicalize(OsStr::new("~docs"), CanonFlags::MISSING),
            Err(ExecGateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_dot_and_dot_dot_elimination() {
        let resolved = canonicalize(OsStr::new("/a/./b/../c//d"), CanonFlags::MISSING)
            .expect("normalizes");
        assert_eq!(resolved, PathBuf::from("/a/c/d"));

        let above_root =
            canonicalize(OsStr::new("/../etc"), CanonFlags::MISSING).expect("normalizes");
        assert_eq!(above_root, PathBuf::from("/etc"));
    }

    #[test]
    fn test_canonical_invariants_and_idempotence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical tempdir");
        fs::create_dir(root.join("sub")).expect("mkdir");
        symlink(root.join("sub"), root.join("alias")).expect("symlink");

        let input = root.join("alias/./nested/../leaf");
        let once = realpath(input.as_os_str()).expect("resolves");
        let twice = realpath(once.as_os_str()).expect("resolves again");
        assert_eq!(once, twice);

        let bytes = canon_bytes(&once);
        assert_eq!(bytes.first(), Some(&b'/'));
        for window in bytes.windows(2) {
            assert_ne!(window, b"//");
        }
        assert!(!bytes.windows(3).any(|w| w == b"/./"));
        assert!(!bytes.windows(4).any(|w| w == b"/../"));
        // The alias link is collapsed to its target.
        assert_eq!(once, root.join("sub/leaf"));
    }

    #[test]
    fn test_symlink_cycle_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().canonicalize().expect("canonical tempdir").join("a");
        symlink("a", &link).expect("self-referential symlink");

        assert!(matches!(
            canonicalize(link.as_os_str(), CanonFlags::EXISTING),
            Err(ExecGateError::LinkLoop(_))
        ));

        let skipped = canonicalize(link.as_os_str(), CanonFlags::MISSING)
            .expect("loop is skipped when components may be missing");
        assert_eq!(skipped, link);
    }

    #[test]
    fn test_mid_path_non_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("plain");
        fs::write(&file, b"x").expect("write file");

        let below_file = file.join("child");
        assert!(matches!(
            canonicalize(below_file.as_os_str(), CanonFlags::EXISTING),
            Err(ExecGateError::NotADirectory(_))
        ));
        // No existence requirement tolerates it.
        assert!(canonicalize(below_file.as_os_str(), CanonFlags::MISSING).is_ok());
    }

    #[test]
    fn test_all_but_last_mode() {
        let dir = tempfile::tempdir().expect("tempdir");

        let missing_leaf = dir.path().join("not-yet");
        assert!(canonicalize(missing_leaf.as_os_str(), CanonFlags::ALL_BUT_LAST).is_ok());

        let missing_parent = dir.path().join("not-yet/leaf");
        assert!(matches!(
            canonicalize(missing_parent.as_os_str(), CanonFlags::ALL_BUT_LAST),
            Err(ExecGateError::NotFound(_))
        ));
    }

    #[test]
    fn test_existing_mode_requires_presence() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            canonicalize(dir.path().join("absent").as_os_str(), CanonFlags::EXISTING),
            Err(ExecGateError::NotFound(_))
        ));
    }

    #[test]
    fn test_read_link_bounded_growth() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target: String = std::iter::repeat('t').take(300).collect();
        let link = dir.path().join("long");
        symlink(&target, &link).expect("symlink");

        // A zero hint forces the doubling path.
        let read = read_link_bounded(&link, 0).expect("link readable");
        assert_eq!(read.len(), 300);
        assert!(read.iter().all(|&b| b == b't'));
    }
}

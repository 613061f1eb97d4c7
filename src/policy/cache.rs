//! Mtime-aware cache for policy-file contents.
//!
//! Each intercepted exec call re-checks the policy lists, so their contents
//! are cached per path and only re-read when the file's modification time
//! moves forward. A stat failure (file removed, /etc unreadable mid-update)
//! leaves the previously cached contents in place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

struct CacheEntry {
    /// Seconds component of the file's last observed mtime.
    mtime: i64,
    contents: Arc<[u8]>,
}

/// Cache of policy-file contents keyed by path.
///
/// Not internally synchronized; the process-wide instance behind [`shared`]
/// serializes refreshes with a mutex.
#[derive(Default)]
pub struct ListCache {
    entries: HashMap<PathBuf, CacheEntry>,
}

impl ListCache {
    #[must_use]
    pub fn new() -> Self {
        ListCache::default()
    }

    /// Current contents of the list at `path`, reloading if the file's mtime
    /// is newer than the cached copy. Returns `None` when the file has never
    /// been readable.
    pub fn get(&mut self, path: &Path) -> Option<Arc<[u8]>> {
        let observed = match nix::sys::stat::stat(path) {
            Ok(st) => st.st_mtime,
            Err(_) => return self.entries.get(path).map(|e| e.contents.clone()),
        };

        let stale = match self.entries.get(path) {
            Some(entry) => observed > entry.mtime,
            None => true,
        };

        if stale {
            match fs::read(path) {
                Ok(bytes) => {
                    debug!(path = %path.display(), len = bytes.len(), "reloaded policy list");
                    self.entries.insert(
                        path.to_path_buf(),
                        CacheEntry {
                            mtime: observed,
                            contents: bytes.into(),
                        },
                    );
                }
                // Keep serving the stale copy when the reload fails.
                Err(err) => {
                    debug!(path = %path.display(), %err, "policy list reload failed");
                }
            }
        }

        self.entries.get(path).map(|e| e.contents.clone())
    }
}

/// The process-wide cache instance.
pub fn shared() -> &'static Mutex<ListCache> {
    static CACHE: OnceLock<Mutex<ListCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(ListCache::new()))
}

/// Convenience accessor over [`shared`] returning an owned handle to the
/// list contents so callers never parse while holding the lock.
pub fn read_list(path: &Path) -> Option<Arc<[u8]>> {
    let mut cache = match shared().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    cache.get(path)
}

//! Mtime-keyed byte cache of policy documents (C1).
//!
//! Process-global and shared across all enforcers. Concurrent callers may
//! race to re-read the same file; that is acceptable because re-reads are
//! idempotent given identical file state (`spec.md` §4.1).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;

use crate::error::PolicyError;

struct CacheEntry {
    data: String,
    mtime: SystemTime,
}

static CACHE: OnceLock<Mutex<HashMap<PathBuf, CacheEntry>>> = OnceLock::new();

fn store() -> &'static Mutex<HashMap<PathBuf, CacheEntry>> {
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Read `path`, reusing the cached contents unless the file's mtime has
/// advanced past what was last observed.
///
/// Returns `(reloaded, contents)`. `force_reload` drops any cached entry for
/// `path` first. I/O failures propagate to the caller; the cache never masks
/// them.
pub fn read(path: &Path, force_reload: bool) -> Result<(bool, String), PolicyError> {
    let mut guard = store().lock().expect("policy file cache lock poisoned");

    if force_reload {
        guard.remove(path);
    }

    let metadata = fs::metadata(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mtime = metadata.modified().map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let needs_reload = match guard.get(path) {
        Some(entry) => mtime > entry.mtime,
        None => true,
    };

    if needs_reload {
        tracing::debug!(path = %path.display(), "reloading cached policy file");
        let data = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        guard.insert(path.to_path_buf(), CacheEntry { data: data.clone(), mtime });
        return Ok((true, data));
    }

    Ok((false, guard.get(path).expect("entry just checked present").data.clone()))
}

/// Drop any cached entry for `path`, forcing the next [`read`] to re-read it.
pub fn invalidate(path: &Path) {
    store().lock().expect("policy file cache lock poisoned").remove(path);
}

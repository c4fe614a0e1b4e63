/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use fs2::FileExt;
use regex::Regex;
use walkdir::WalkDir;

/// Exclusive advisory lock serializing a target's build across processes,
/// held for the span of resolve + build + install + metadata
/// finalization. Released when dropped.
pub struct TargetLock {
    file: File,
}

impl TargetLock {
    /// Non-blocking first-pass acquisition. `None` when another process
    /// holds the lock; the caller defers the target to the blocking pass.
    pub fn try_acquire(path: &Path) -> anyhow::Result<Option<TargetLock>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(TargetLock { file })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to lock '{}'", path.display()))
            }
        }
    }

    /// Blocking second-pass acquisition.
    pub fn acquire(path: &Path) -> anyhow::Result<TargetLock> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .with_context(|| format!("failed to lock '{}'", path.display()))?;
        Ok(TargetLock { file })
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_lock_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("failed to open lock file '{}'", path.display()))
}

/// Remove leftover lock files under `root`, e.g. after a crashed build.
/// Runs only when explicitly requested, never during a normal build.
pub fn purge_stale_locks(root: &Path) -> anyhow::Result<usize> {
    let pattern =
        Regex::new(r"^\.lck\..+\.lck\.$").context("failed to compile lock pattern")?;
    if !root.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in WalkDir::new(root) {
        let entry = entry
            .with_context(|| format!("failed to walk metadata root '{}'", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if pattern.is_match(&name) {
            fs::remove_file(entry.path())
                .with_context(|| format!("failed to remove '{}'", entry.path().display()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lck.abc.lck.");

        let first = TargetLock::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(TargetLock::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(TargetLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn test_blocking_acquire_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lck.abc.lck.");
        {
            let _held = TargetLock::acquire(&path).unwrap();
        }
        let _reacquired = TargetLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_purge_stale_locks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".lck.123.lck."), "").unwrap();
        fs::write(dir.path().join("unrelated"), "").unwrap();
        let removed = purge_stale_locks(dir.path()).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join(".lck.123.lck.").exists());
        assert!(dir.path().join("unrelated").exists());
    }

    #[test]
    fn test_purge_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(purge_stale_locks(&dir.path().join("nope")).unwrap(), 0);
    }
}

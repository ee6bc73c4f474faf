// Copyright © 2022 The Radicle Team
//
// This file is part of refstore, distributed under the terms of the GNU
// General Public License v3.0 or later. See the included LICENSE file.

//! Lockfile CAS primitives, built on `git-lock` the same way
//! `link-git::refs::db` locks `packed-refs`.
//!
//! §5 requires that lock acquisition "must never block indefinitely without
//! a timeout option exposed at the boundary" - [`LockTimeout`] is that
//! boundary knob.

use std::{io::Write as _, path::Path, time::Duration};

use refstore_core::error::{Error, Result};

/// How long to wait for a contended lockfile before giving up.
#[derive(Clone, Copy, Debug)]
pub enum LockTimeout {
    /// Fail immediately if the lockfile already exists (the `O_EXCL` fast
    /// path of §4.6).
    Immediate,
    /// Retry with backoff for up to the given duration.
    After(Duration),
}

impl Default for LockTimeout {
    fn default() -> Self {
        LockTimeout::Immediate
    }
}

impl From<LockTimeout> for git_lock::acquire::Fail {
    fn from(t: LockTimeout) -> Self {
        match t {
            LockTimeout::Immediate => git_lock::acquire::Fail::Immediately,
            LockTimeout::After(d) => git_lock::acquire::Fail::AfterDurationWithBackoff(d),
        }
    }
}

/// Acquire an exclusive write lock on `path` (i.e. `<path>.lock`), returning
/// a handle that must be written to and then [`git_lock::File::commit`]ted
/// to atomically rename the lock over `path`.
pub fn acquire_for_update(path: &Path, timeout: LockTimeout) -> Result<git_lock::File> {
    git_lock::File::acquire_to_update_resource(path, timeout.into(), None)
        .map_err(|e| Error::lock(format!("failed to lock {}: {e}", path.display())))
}

/// Acquire a lock solely to hold a resource stable while it is read (used
/// for the single global `packed-refs.lock`, per §4.6 "Packed-refs
/// rewrite").
pub fn acquire_to_hold(path: &Path, timeout: LockTimeout) -> Result<git_lock::Marker> {
    git_lock::Marker::acquire_to_hold_resource(path, timeout.into(), None)
        .map_err(|e| Error::lock(format!("failed to lock {}: {e}", path.display())))
}

/// Step 4 of §4.6's write path: lock `path`, write `contents`, fsync, and
/// atomically rename the lockfile over `path`.
pub fn write_and_commit(path: &Path, contents: &[u8], timeout: LockTimeout) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut lock = acquire_for_update(path, timeout)?;
    lock.write_all(contents)
        .map_err(|e| Error::lock(format!("failed to write {}: {e}", path.display())))?;
    lock.flush()
        .map_err(|e| Error::lock(format!("failed to flush {}: {e}", path.display())))?;
    lock.commit()
        .map_err(|e| Error::lock(format!("failed to commit {}: {e}", path.display())))?;
    Ok(())
}

/// Hold `path`'s lock for the duration of `f`, then remove `path`. Used by
/// deletes, which have no new content to rename into place.
pub fn delete_under_lock(
    path: &Path,
    timeout: LockTimeout,
    f: impl FnOnce() -> Result<()>,
) -> Result<()> {
    let _marker = acquire_to_hold(path, timeout)?;
    f()?;
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
